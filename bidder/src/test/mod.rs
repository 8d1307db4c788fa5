pub mod e2e;

pub mod tmp_dir {
    use std::{
        path::PathBuf,
        sync::atomic::{AtomicUsize, Ordering},
    };

    /// Create a fresh, empty directory under the system temp dir.
    pub fn try_new(name: &str) -> std::io::Result<PathBuf> {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        let dir = std::env::temp_dir().join(format!(
            "{name}_{}_{}_{}",
            std::process::id(),
            rama::utils::time::now_unix_ms(),
            COUNTER.fetch_add(1, Ordering::Relaxed),
        ));
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}
