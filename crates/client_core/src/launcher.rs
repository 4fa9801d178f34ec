use std::io;

/// Hands a path or URL to whatever the platform opens it with.
pub trait Launcher: Send + Sync {
    fn launch(&self, target: &str) -> io::Result<()>;
}

pub struct SystemLauncher;

impl Launcher for SystemLauncher {
    fn launch(&self, target: &str) -> io::Result<()> {
        open::that_detached(target)
    }
}
