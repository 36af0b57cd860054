//! Opening the authorization URL in the user's browser.

use std::io;
use std::process::{Command, Stdio};
use tracing::debug;

/// Opens a URL in a browser.
pub trait BrowserLauncher: Send + Sync {
    /// Start the browser and return without waiting for it to exit.
    fn open(&self, url: &str) -> io::Result<()>;
}

/// The platform's default-browser command, chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemBrowser {
    /// `open <url>`
    Darwin,
    /// `cmd /c start "" "<url>"`, passed to `cmd` verbatim so `&` in the
    /// query stays inside the quoted URL.
    Windows,
    /// `xdg-open <url>`, used for Linux and every other platform.
    LinuxDefault,
}

impl SystemBrowser {
    /// Select the launcher for the platform this binary runs on.
    pub fn detect() -> Self {
        Self::for_os(std::env::consts::OS)
    }

    /// Select the launcher for an `std::env::consts::OS` value.
    pub fn for_os(os: &str) -> Self {
        match os {
            "macos" => Self::Darwin,
            "windows" => Self::Windows,
            _ => Self::LinuxDefault,
        }
    }

    /// Program and arguments that open `url`.
    ///
    /// For [`SystemBrowser::Windows`] the arguments are already quoted for
    /// `cmd.exe` and must be passed without further escaping.
    pub fn command_line(&self, url: &str) -> Vec<String> {
        match self {
            Self::Darwin => vec!["open".to_string(), url.to_string()],
            Self::Windows => vec![
                "cmd".to_string(),
                "/c".to_string(),
                "start".to_string(),
                // `start` takes the first quoted argument as the window title.
                "\"\"".to_string(),
                format!("\"{}\"", url.replace('"', "%22")),
            ],
            Self::LinuxDefault => vec!["xdg-open".to_string(), url.to_string()],
        }
    }

    #[cfg(windows)]
    fn push_args(&self, command: &mut Command, args: &[String]) {
        use std::os::windows::process::CommandExt;
        if *self == Self::Windows {
            for arg in args {
                command.raw_arg(arg);
            }
        } else {
            command.args(args);
        }
    }

    #[cfg(not(windows))]
    fn push_args(&self, command: &mut Command, args: &[String]) {
        command.args(args);
    }
}

impl Default for SystemBrowser {
    fn default() -> Self {
        Self::detect()
    }
}

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> io::Result<()> {
        let args = self.command_line(url);
        let Some((program, rest)) = args.split_first() else {
            return Err(io::Error::other("empty browser command"));
        };

        debug!(launcher = ?self, "Opening browser");
        let mut command = Command::new(program);
        self.push_args(&mut command, rest);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let mut child = command
            .spawn()
            .map_err(|e| io::Error::new(e.kind(), format!("{}: {}", program, e)))?;
        // Reap the launcher once it exits.
        std::thread::spawn(move || child.wait());
        Ok(())
    }
}
