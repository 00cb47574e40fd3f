// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 文件监听
//!
//! notify 的回调运行在它自己的线程里，只负责把"有变化"推入一个有界通道；
//! 异步侧的合并阶段在窗口期内没有新事件时才触发一次回调（后沿触发）。

use std::{path::Path, time::Duration};

use log::{debug, info, warn};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::exception::Exception;

/// 通道满时新的事件直接丢弃，反正它们会被合并成同一次触发
const CHANNEL_CAPACITY: usize = 64;

/// 纯访问事件与无法分类的事件不会触发刷新
pub fn is_relevant(kind: &EventKind) -> bool {
    !matches!(kind, EventKind::Access(_) | EventKind::Any)
}

/// 合并突发事件：收到事件后等待 `window`，期间每来一个新事件就重新计时，静默后调用一次 `fire`。
/// 通道关闭时若仍有未触发的事件，先触发再返回。
pub async fn debounce<F>(mut receiver: mpsc::Receiver<()>, window: Duration, mut fire: F)
where
    F: FnMut(),
{
    while receiver.recv().await.is_some() {
        loop {
            match tokio::time::timeout(window, receiver.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => {
                    fire();
                    return;
                }
                Err(_) => break,
            }
        }
        fire();
    }
}

/// 递归监听目录，直到所在任务被取消。
pub async fn watch<F>(directory: &Path, window: Duration, fire: F) -> Result<(), Exception>
where
    F: FnMut() + Send,
{
    let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
    let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
        match result {
            Ok(event) if is_relevant(&event.kind) => {
                debug!("文件变化：{:?} {:?}", event.kind, event.paths);
                let _ = sender.try_send(());
            }
            Ok(_) => {}
            Err(e) => warn!("文件监听出错: {}", e),
        }
    })
    .map_err(|e| Exception::Watch(e.to_string()))?;

    watcher
        .watch(directory, RecursiveMode::Recursive)
        .map_err(|e| Exception::Watch(format!("{}: {}", directory.display(), e)))?;
    info!("开始监听目录：{}", directory.display());

    debounce(receiver, window, fire).await;
    Ok(())
}
