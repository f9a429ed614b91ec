use std::path::PathBuf;
#[cfg(test)]
use std::sync::{Mutex, MutexGuard, OnceLock};

pub const HOME_ENV: &str = "PROXYDASH_HOME";

/// Get proxydash's home directory.
///
/// `PROXYDASH_HOME` wins when set to a non-empty value, otherwise `~/.proxydash`.
pub fn proxydash_home_dir() -> Result<PathBuf, std::io::Error> {
    if let Ok(v) = std::env::var(HOME_ENV)
        && !v.trim().is_empty()
    {
        return Ok(PathBuf::from(v));
    }

    let home = dirs::home_dir().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Could not determine home directory",
        )
    })?;

    Ok(home.join(".proxydash"))
}

#[cfg(test)]
pub(crate) fn test_home_env_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn with_home_env<T>(value: Option<&std::ffi::OsStr>, f: impl FnOnce() -> T) -> T {
        let _lock = test_home_env_lock();
        let previous = std::env::var_os(HOME_ENV);
        match value {
            Some(v) => unsafe { std::env::set_var(HOME_ENV, v) },
            None => unsafe { std::env::remove_var(HOME_ENV) },
        }
        let out = f();
        match previous {
            Some(value) => unsafe { std::env::set_var(HOME_ENV, value) },
            None => unsafe { std::env::remove_var(HOME_ENV) },
        }
        out
    }

    #[test]
    fn home_dir_respects_env_override() {
        let temp = TempDir::new().unwrap();
        let got = with_home_env(Some(temp.path().as_os_str()), || proxydash_home_dir().unwrap());
        assert_eq!(got, temp.path());
    }

    #[test]
    fn blank_env_override_falls_back_to_home() {
        let got = with_home_env(Some(std::ffi::OsStr::new("  ")), proxydash_home_dir);
        if let Ok(path) = got {
            assert!(path.ends_with(".proxydash"));
        }
    }
}
