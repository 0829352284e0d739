use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use super::{Platform, resolve_data_dir};

pub struct NativePlatform;

impl Platform for NativePlatform {
    fn kill_process(pid: &str) -> std::io::Result<std::process::Output> {
        std::process::Command::new("kill")
            .arg("-15")
            .arg(pid)
            .output()
    }

    fn tail_file(path: &Path) -> std::io::Result<std::process::Child> {
        std::process::Command::new("tail")
            .arg("-n")
            .arg("200")
            .arg("-f")
            .arg(path)
            .spawn()
    }

    fn restrict_dir_permissions(path: &Path) {
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700));
    }

    fn restrict_file_permissions(path: &Path) {
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }

    fn data_dir() -> PathBuf {
        resolve_data_dir(
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".freeclaim"),
        )
    }
}
