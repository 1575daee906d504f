// Locating the adb executable
use super::error::{AdbError, AdbResult};
use super::types::{AdbExecutable, AdbSource};
use crate::config::AdbConfig;
use log::{error, info, warn};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

const INSTALL_DIR: &str = ".android-macro-run";
const FETCH_TIMEOUT: Duration = Duration::from_secs(300);

#[cfg(windows)]
const ADB_FILE: &str = "adb.exe";
#[cfg(not(windows))]
const ADB_FILE: &str = "adb";

const VENDOR_PATHS: &[&str] = &[
    r"C:\Program Files\BlueStacks_nxt\HD-Adb.exe",
    r"C:\Program Files\BlueStacks\HD-Adb.exe",
    r"C:\Program Files (x86)\BlueStacks_nxt\HD-Adb.exe",
    r"C:\Program Files (x86)\BlueStacks\HD-Adb.exe",
];

pub fn platform_tools_url() -> &'static str {
    if cfg!(windows) {
        "https://dl.google.com/android/repository/platform-tools-latest-windows.zip"
    } else if cfg!(target_os = "macos") {
        "https://dl.google.com/android/repository/platform-tools-latest-darwin.zip"
    } else {
        "https://dl.google.com/android/repository/platform-tools-latest-linux.zip"
    }
}

/// Search order for the `adb` executable.
///
/// explicit path, bundled `platform-tools` copies, `PATH`, download, vendor
/// copies (BlueStacks `HD-Adb`), and finally the bare command name.
#[derive(Debug, Clone)]
pub struct AdbLocator {
    pub explicit: Option<PathBuf>,
    /// Directories that may contain `platform-tools/adb`.
    pub bundled_roots: Vec<PathBuf>,
    pub search_path: bool,
    /// Where a downloaded `platform-tools` is unpacked; `None` disables fetching.
    pub install_root: Option<PathBuf>,
    pub fetch_url: String,
    pub vendor_paths: Vec<PathBuf>,
}

impl AdbLocator {
    pub fn from_config(config: &AdbConfig) -> Self {
        let explicit = (config.adb_path != "auto").then(|| PathBuf::from(&config.adb_path));

        let home_root = homedir::my_home()
            .ok()
            .flatten()
            .map(|home| home.join(INSTALL_DIR));

        let mut bundled_roots = Vec::new();
        if let Ok(exe) = std::env::current_exe()
            && let Some(dir) = exe.parent()
        {
            bundled_roots.push(dir.join("tools"));
        }
        if let Ok(cwd) = std::env::current_dir() {
            bundled_roots.push(cwd.join("tools"));
        }
        bundled_roots.extend(home_root.clone());

        Self {
            explicit,
            bundled_roots,
            search_path: true,
            install_root: if config.auto_fetch { home_root } else { None },
            fetch_url: platform_tools_url().to_string(),
            vendor_paths: VENDOR_PATHS.iter().map(PathBuf::from).collect(),
        }
    }

    pub async fn resolve(&self) -> AdbExecutable {
        if let Some(path) = &self.explicit {
            if path.is_file() {
                return found(path.clone(), AdbSource::Explicit);
            }
            warn!("⚠️ Configured adb_path not found: {}", path.display());
        }

        if let Some(path) = self
            .bundled_roots
            .iter()
            .map(|root| bundled_adb(root))
            .find(|p| p.is_file())
        {
            info!("📦 Using bundled adb: {}", path.display());
            return found(path, AdbSource::Bundled);
        }

        if self.search_path
            && let Ok(path) = which::which("adb")
            && !path.to_string_lossy().contains("HD-Adb")
        {
            info!("🔍 Found system adb: {}", path.display());
            return found(path, AdbSource::System);
        }

        if let Some(root) = &self.install_root {
            info!("⬇️ No standard adb found, downloading platform-tools...");
            match fetch_platform_tools(&self.fetch_url, root).await {
                Ok(path) => return found(path, AdbSource::Fetched),
                Err(e) => error!("❌ {e}"),
            }
        }

        if let Some(path) = self.vendor_paths.iter().find(|p| p.is_file()) {
            warn!(
                "⚠️ Using BlueStacks HD-Adb, input commands may not work: {}",
                path.display()
            );
            return found(path.clone(), AdbSource::Vendor);
        }

        warn!("⚠️ adb not found, falling back to plain 'adb'");
        found(PathBuf::from("adb"), AdbSource::Bare)
    }
}

fn found(path: PathBuf, source: AdbSource) -> AdbExecutable {
    AdbExecutable { path, source }
}

fn bundled_adb(root: &Path) -> PathBuf {
    root.join("platform-tools").join(ADB_FILE)
}

fn fetch_failed(description: impl Into<String>) -> AdbError {
    AdbError::FetchFailed {
        description: description.into(),
    }
}

/// Downloads the platform-tools archive from `url` and unpacks it into `root`.
pub async fn fetch_platform_tools(url: &str, root: &Path) -> AdbResult<PathBuf> {
    info!("⬇️ Downloading {url}");
    let client = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(|e| fetch_failed(e.to_string()))?;
    let archive = client
        .get(url)
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(|e| fetch_failed(e.to_string()))?
        .bytes()
        .await
        .map_err(|e| fetch_failed(e.to_string()))?;
    info!("📦 Downloaded {} bytes", archive.len());

    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || unpack_platform_tools(&archive, &root))
        .await
        .map_err(|e| fetch_failed(format!("unpack task failed: {e}")))?
}

/// Extracts a platform-tools zip into `root` and returns the `adb` inside it.
pub fn unpack_platform_tools(archive: &[u8], root: &Path) -> AdbResult<PathBuf> {
    std::fs::create_dir_all(root)
        .map_err(|e| fetch_failed(format!("cannot create {}: {e}", root.display())))?;
    let mut zip = zip::ZipArchive::new(Cursor::new(archive))
        .map_err(|e| fetch_failed(format!("not a zip archive: {e}")))?;
    zip.extract(root)
        .map_err(|e| fetch_failed(format!("could not unpack archive: {e}")))?;

    let adb = bundled_adb(root);
    if !adb.is_file() {
        return Err(fetch_failed(format!("{} missing after unpack", adb.display())));
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&adb, std::fs::Permissions::from_mode(0o755))
            .map_err(|e| fetch_failed(format!("cannot mark {} executable: {e}", adb.display())))?;
    }
    info!("✅ platform-tools installed: {}", adb.display());
    Ok(adb)
}
