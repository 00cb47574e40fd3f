// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 服务端渲染服务器
//!
//! 启动流程：
//! - 通过 log4rs 初始化日志
//! - 读取 TOML 配置（第一个命令行参数，缺省为 `config/development.toml`）
//! - 按配置的工作线程数构建 Tokio 运行时
//! - 组装路由表并开始监听
//! - 后台管理控制台（`stop` / `status` / `help`）与 Ctrl-C 都会触发优雅停机

use ssr_webserver::{exception::Exception, Config, HandlebarsEngine, Server};

use log::{error, info, warn};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::TcpListener,
    runtime::Builder,
    sync::watch,
};

use std::{
    net::{Ipv4Addr, SocketAddrV4},
    process,
    sync::{atomic::Ordering, Arc},
};

const DEFAULT_CONFIG: &str = "config/development.toml";
const LOG_CONFIG: &str = "config/log4rs.yaml";

fn main() {
    if let Err(e) = log4rs::init_file(LOG_CONFIG, Default::default()) {
        eprintln!("无法初始化日志系统（{}）：{}", LOG_CONFIG, e);
    }

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let config = match Config::from_toml(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("配置文件{}载入失败：{}", config_path, e);
            eprintln!("配置文件{}载入失败：{}", config_path, e);
            process::exit(1);
        }
    };
    info!("配置文件已载入：{}，运行模式：{:?}", config_path, config.mode());

    let runtime = match Builder::new_multi_thread()
        .worker_threads(config.worker_threads())
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("无法创建Tokio运行时：{}", e);
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(config)) {
        error!("服务器异常退出：{}", e);
        process::exit(1);
    }
    info!("服务器已停止");
}

async fn run(config: Config) -> Result<(), Exception> {
    let port = config.port();
    let address = match config.local() {
        true => Ipv4Addr::new(127, 0, 0, 1),
        false => Ipv4Addr::new(0, 0, 0, 0),
    };
    let listener = TcpListener::bind(SocketAddrV4::new(address, port))
        .await
        .map_err(|e| Exception::Io(format!("无法绑定端口{}：{}", port, e)))?;
    info!("服务端将在{}:{}上监听Socket连接", address, port);

    let server = Server::new(config, Arc::new(HandlebarsEngine::new())).await?;
    let (shutdown_sender, shutdown) = watch::channel(false);
    let shutdown_sender = Arc::new(shutdown_sender);

    // 后台管理控制台
    tokio::spawn({
        let shutdown_sender = shutdown_sender.clone();
        let active_connections = server.active_connections();
        let autoreload = server.autoreload();
        async move {
            let mut reader = BufReader::new(tokio::io::stdin());
            let mut input = String::new();
            loop {
                input.clear();
                match reader.read_line(&mut input).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
                match input.trim() {
                    "stop" => {
                        println!("停机指令已激活，服务器正在关闭...");
                        let _ = shutdown_sender.send(true);
                        break;
                    }
                    "help" => {
                        println!("== Webserver Help ==");
                        println!("stop   - 发出停机信号");
                        println!("status - 查看当前服务器运行状态");
                        println!("help   - 显示此帮助信息");
                        println!("====================");
                    }
                    "status" => {
                        println!("== Webserver 状态 ===");
                        println!(
                            "当前活跃连接数: {}",
                            active_connections.load(Ordering::SeqCst)
                        );
                        println!("实时刷新连接数: {}", autoreload.connections().len());
                        println!("====================");
                    }
                    "" => {}
                    cmd => println!("无效的命令：{}", cmd),
                }
            }
        }
    });

    tokio::spawn({
        let shutdown_sender = shutdown_sender.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("接收到Ctrl-C");
                    let _ = shutdown_sender.send(true);
                }
                Err(e) => warn!("无法监听Ctrl-C信号：{}", e),
            }
        }
    });

    server.serve(listener, shutdown).await
}
