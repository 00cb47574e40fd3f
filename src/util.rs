use std::path::{Path, PathBuf};

use log::debug;
use tokio::fs;

use crate::exception::Exception;

/// 递归收集目录下的所有文件，返回以 `/` 分隔、按字典序排列的相对路径。
///
/// 以 `.` 开头的文件与目录会被跳过；目录不存在时返回空列表。
pub async fn collect_files(root: &Path) -> Result<Vec<String>, Exception> {
    let mut files = Vec::new();
    if !fs::try_exists(root).await.unwrap_or(false) {
        debug!("目录不存在，跳过：{}", root.display());
        return Ok(files);
    }

    let mut stack: Vec<PathBuf> = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| Exception::from_io(e, &dir.to_string_lossy()))?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with('.') {
                continue;
            }
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                stack.push(path);
            } else if let Ok(relative) = path.strip_prefix(root) {
                files.push(to_slash(relative));
            }
        }
    }

    files.sort();
    Ok(files)
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// 去掉最后一段路径的扩展名：`nav/menu.html` -> `nav/menu`
pub fn strip_extension(relative: &str) -> &str {
    let file_start = relative.rfind('/').map_or(0, |i| i + 1);
    match relative[file_start..].rfind('.') {
        Some(0) | None => relative,
        Some(dot) => &relative[..file_start + dot],
    }
}

/// HTML 实体转义，覆盖 ``& < > " ' ` = /``
pub fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            '`' => escaped.push_str("&#x60;"),
            '=' => escaped.push_str("&#x3D;"),
            '/' => escaped.push_str("&#x2F;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
