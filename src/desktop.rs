use std::io::Write;
use std::process::{Command, Output, Stdio};

use dialog::DialogBox;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::TrayError;
use crate::info;

pub const APP_NAME: &str = "Twingate Tray";
pub const COPY_BUTTON: &str = "Copy to Clipboard";

/// Tried in order, the first one that accepts the text wins.
const CLIPBOARD_TOOLS: &[(&str, &[&str])] = &[
    ("wl-copy", &[]),
    ("xclip", &["-selection", "clipboard"]),
    ("xsel", &["--clipboard", "--input"]),
];

#[derive(Debug, Clone)]
pub struct Desktop {
    notifications: bool,
    timeout_ms: u32,
}

impl Desktop {
    pub fn new(config: &Config) -> Self {
        Desktop {
            notifications: config.notifications,
            timeout_ms: config.notification_timeout_ms,
        }
    }

    /// Desktop notification through `notify-send`. Failures are ignored.
    pub fn notify(&self, title: &str, body: &str) {
        if !self.notifications {
            return;
        }
        let timeout = self.timeout_ms.to_string();
        let result = Command::new("notify-send")
            .args(["-a", APP_NAME, "-t", timeout.as_str(), title, body])
            .status();
        if let Err(e) = result {
            debug!(error = %e, "notify-send unavailable");
        }
    }

    pub fn show_message(&self, title: &str, text: &str) {
        if let Err(e) = dialog::Message::new(text).title(title).show() {
            warn!(error = %e, title, "failed to show dialog");
        }
    }

    /// Single-column list picker. `None` when the user cancels.
    pub fn choose(&self, title: &str, text: &str, column: &str, options: &[String]) -> Option<String> {
        let output = Command::new("zenity")
            .arg("--list")
            .arg(format!("--title={title}"))
            .arg(format!("--text={text}"))
            .arg(format!("--column={column}"))
            .args(["--width=600", "--height=400"])
            .args(options)
            .output();
        match output {
            Ok(out) if out.status.success() => parse_choice(&String::from_utf8_lossy(&out.stdout)),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "zenity unavailable");
                None
            }
        }
    }

    /// Shows `text` in a scrollable window with a copy button. Copying puts
    /// the text on the clipboard and shows the window again.
    pub fn show_copyable(&self, title: &str, text: &str) {
        loop {
            let output = run_with_input(
                "zenity",
                &[
                    "--text-info",
                    &format!("--title={title}"),
                    "--width=550",
                    "--height=500",
                    "--font=monospace",
                    "--ok-label=OK",
                    &format!("--extra-button={COPY_BUTTON}"),
                ],
                text,
            );
            let out = match output {
                Ok(out) => out,
                Err(e) => {
                    debug!(error = %e, "zenity unavailable, falling back to a message box");
                    self.show_message(title, &info::escape_markup(text));
                    return;
                }
            };
            if !is_copy_request(&String::from_utf8_lossy(&out.stdout)) {
                return;
            }
            match copy_to_clipboard(text) {
                Ok(()) => self.notify("Copied", "Connection info copied to clipboard"),
                Err(e) => {
                    warn!(error = %e, "failed to copy to clipboard");
                    self.notify("Copy Failed", &format!("Failed to copy: {e}"));
                }
            }
        }
    }

    pub fn open_url(&self, url: &str) -> Result<(), TrayError> {
        let url = normalize_url(url);
        debug!(%url, "opening browser");
        Command::new("xdg-open").arg(&url).spawn()?;
        Ok(())
    }
}

/// Whether a text-info window was closed with the copy button.
pub fn is_copy_request(stdout: &str) -> bool {
    stdout.trim() == COPY_BUTTON
}

pub fn copy_to_clipboard(text: &str) -> Result<(), TrayError> {
    for (program, args) in CLIPBOARD_TOOLS {
        match pipe_into(program, args, text) {
            Ok(()) => return Ok(()),
            Err(e) => debug!(error = %e, program, "clipboard tool failed"),
        }
    }
    Err(TrayError::Command("no clipboard tool available".into()))
}

fn pipe_into(program: &str, args: &[&str], input: &str) -> Result<(), TrayError> {
    let out = run_with_input(program, args, input)?;
    if !out.status.success() {
        return Err(TrayError::Command(format!("{program} exited with {}", out.status)));
    }
    Ok(())
}

fn run_with_input(program: &str, args: &[&str], input: &str) -> std::io::Result<Output> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input.as_bytes())?;
    }
    child.wait_with_output()
}

/// Row picked in a zenity list, without the trailing newline.
pub fn parse_choice(stdout: &str) -> Option<String> {
    let choice = stdout.trim_end_matches(['\r', '\n']);
    (!choice.is_empty()).then(|| choice.to_string())
}

/// Adds `https://` when the URL has no scheme.
pub fn normalize_url(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}
