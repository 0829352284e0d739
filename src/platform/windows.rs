use std::path::{Path, PathBuf};

use super::{Platform, resolve_data_dir};

pub struct NativePlatform;

impl Platform for NativePlatform {
    fn kill_process(pid: &str) -> std::io::Result<std::process::Output> {
        std::process::Command::new("taskkill")
            .args(["/PID", pid, "/F"])
            .output()
    }

    fn tail_file(path: &Path) -> std::io::Result<std::process::Child> {
        std::process::Command::new("powershell")
            .args([
                "-NoProfile",
                "-Command",
                &format!("Get-Content -Path '{}' -Tail 200 -Wait", path.display()),
            ])
            .spawn()
    }

    fn restrict_dir_permissions(_path: &Path) {}

    fn restrict_file_permissions(_path: &Path) {}

    fn data_dir() -> PathBuf {
        resolve_data_dir(
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("freeclaim"),
        )
    }
}
