use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use tokio::process::Command;

use crate::action::types::{ParsedAction, ScreenPoint, ScrollDirection};
use crate::config::AdbConfig;
use crate::errors::{PilotError, PilotResult};
use crate::operator::Operator;
use crate::perception::types::{ImageEncoding, ScreenshotOutput};

pub const ADB_ACTION_SPACES: &[&str] = &[
    "click(start_box='[x1, y1, x2, y2]')",
    "type(content='')",
    "swipe(start_box='[x1, y1, x2, y2]', end_box='[x3, y3, x4, y4]')",
    "scroll(start_box='[x1, y1, x2, y2]', direction='down or up or right or left') # You must spesify the start_box",
    "hotkey(key='') # The available keys: enter,back,home,backspace,delete,menu,power,volume_up,volume_down,mute,lock",
    "wait() #Sleep for 2s and take a screenshot to check for any changes.",
    "press_home() # Press the home key",
    "open_app(package_name='') # Open an app by its package name",
    "finished()",
    "call_user() # Submit the task and call the user when the task is unsolvable, or when you need the user's help.",
];

const ADB_KEYBOARD_IME: &str = "com.android.adbkeyboard/.AdbIME";
const CLEAR_FIELD_PRESSES: usize = 50;
const SCROLL_DISTANCE: i32 = 200;
const SCROLL_DURATION_MS: u32 = 100;
const SWIPE_DURATION_MS: u32 = 300;
const WAIT: Duration = Duration::from_secs(2);

/// Runs `adb` with the given arguments and returns its stdout.
#[async_trait]
pub trait DeviceShell: Send + Sync {
    async fn run(&self, args: &[String], timeout: Duration) -> PilotResult<Vec<u8>>;
}

/// Spawns the `adb` binary (from `PATH` unless another program is given).
#[derive(Debug, Clone)]
pub struct AdbShell {
    program: PathBuf,
}

impl AdbShell {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for AdbShell {
    fn default() -> Self {
        Self::new("adb")
    }
}

#[async_trait]
impl DeviceShell for AdbShell {
    async fn run(&self, args: &[String], timeout: Duration) -> PilotResult<Vec<u8>> {
        let program = self.program.display();
        let child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(timeout, child)
            .await
            .map_err(|_| {
                PilotError::Transport(format!("{program} {} timed out after {timeout:?}", args.join(" ")))
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PilotError::Transport(format!(
                "{program} {} exited with {}: {}",
                args.join(" "),
                output.status,
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    }
}

/// Returns the first device listed by `adb devices`.
pub async fn discover_device(shell: &dyn DeviceShell, timeout: Duration) -> PilotResult<String> {
    let out = shell.run(&["devices".to_string()], timeout).await?;
    let devices = parse_device_list(&String::from_utf8_lossy(&out));
    match devices.as_slice() {
        [] => Err(PilotError::Config("no Android device connected".into())),
        [only] => Ok(only.clone()),
        [first, ..] => {
            tracing::warn!(count = devices.len(), device = %first, "several devices attached; using the first");
            Ok(first.clone())
        }
    }
}

fn parse_device_list(out: &str) -> Vec<String> {
    out.lines()
        .skip_while(|l| !l.starts_with("List of devices"))
        .skip(1)
        .filter_map(|l| {
            let mut cols = l.split_whitespace();
            match (cols.next(), cols.next()) {
                (Some(id), Some("device")) => Some(id.to_string()),
                _ => None,
            }
        })
        .collect()
}

/// Drives an Android device through `adb`. Points are raw screenshot pixels.
pub struct AdbOperator {
    device_id: String,
    shell: Arc<dyn DeviceShell>,
    command_timeout: Duration,
    screencap_timeout: Duration,
}

impl AdbOperator {
    pub fn new(device_id: impl Into<String>, shell: Arc<dyn DeviceShell>, cfg: &AdbConfig) -> Self {
        Self {
            device_id: device_id.into(),
            shell,
            command_timeout: Duration::from_millis(cfg.command_timeout_ms),
            screencap_timeout: Duration::from_millis(cfg.screencap_timeout_ms),
        }
    }

    /// Uses `cfg.device_id` when set, otherwise the first attached device.
    pub async fn connect(cfg: &AdbConfig) -> PilotResult<Self> {
        let shell: Arc<dyn DeviceShell> = Arc::new(AdbShell::default());
        let device_id = if cfg.device_id.is_empty() {
            discover_device(shell.as_ref(), Duration::from_millis(cfg.command_timeout_ms)).await?
        } else {
            cfg.device_id.clone()
        };
        tracing::info!(device = %device_id, "[adb] operator ready");
        Ok(Self::new(device_id, shell, cfg))
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn shell(&self, action: &str, cmd: &[&str]) -> PilotResult<String> {
        let mut args = vec!["-s".to_string(), self.device_id.clone(), "shell".to_string()];
        args.extend(cmd.iter().map(|s| s.to_string()));
        tracing::debug!(cmd = %cmd.join(" "), "[adb] shell");
        self.shell
            .run(&args, self.command_timeout)
            .await
            .map(|out| String::from_utf8_lossy(&out).into_owned())
            .map_err(|e| match e {
                PilotError::Execution { .. } => e,
                other => PilotError::execution(action, other.to_string()),
            })
    }

    async fn keyevent(&self, action: &str, code: &str) -> PilotResult<()> {
        self.shell(action, &["input", "keyevent", code]).await.map(|_| ())
    }

    async fn tap(&self, p: ScreenPoint) -> PilotResult<()> {
        let (x, y) = (p.x.to_string(), p.y.to_string());
        self.shell("click", &["input", "tap", x.as_str(), y.as_str()])
            .await
            .map(|_| ())
    }

    async fn swipe(&self, action: &str, from: ScreenPoint, to: ScreenPoint, duration_ms: u32) -> PilotResult<()> {
        let args: Vec<String> = [from.x, from.y, to.x, to.y, duration_ms as i32]
            .iter()
            .map(|v| v.to_string())
            .collect();
        let mut cmd = vec!["input", "swipe"];
        cmd.extend(args.iter().map(String::as_str));
        self.shell(action, &cmd).await.map(|_| ())
    }

    /// Checked before every `type`: the keyboard may be installed mid-run.
    async fn ensure_adb_keyboard(&self) -> PilotResult<()> {
        let list = self.shell("type", &["ime", "list", "-a"]).await?;
        if !list.contains("adbkeyboard") {
            return Err(PilotError::execution(
                "type",
                "ADB keyboard input method is not installed on the device; install com.android.adbkeyboard first",
            ));
        }
        self.shell("type", &["ime", "enable", ADB_KEYBOARD_IME]).await?;
        self.shell("type", &["ime", "set", ADB_KEYBOARD_IME]).await?;
        Ok(())
    }

    async fn type_text(&self, content: &str) -> PilotResult<()> {
        self.ensure_adb_keyboard().await?;
        for _ in 0..CLEAR_FIELD_PRESSES {
            self.keyevent("type", "KEYCODE_DEL").await?;
        }
        let text: String = content.chars().filter(|c| *c != '\n' && *c != '\r').collect();
        let text = text.strip_suffix("\\n").unwrap_or(text.as_str());
        let encoded = base64::engine::general_purpose::STANDARD.encode(text.as_bytes());
        let msg = format!("'{encoded}'");
        self.shell("type", &["am", "broadcast", "-a", "ADB_INPUT_B64", "--es", "msg", msg.as_str()])
            .await
            .map(|_| ())
    }
}

pub fn keycode(key: &str) -> Option<&'static str> {
    Some(match key.trim().to_lowercase().as_str() {
        "enter" => "KEYCODE_ENTER",
        "back" => "KEYCODE_BACK",
        "home" => "KEYCODE_HOME",
        "backspace" => "67",
        "delete" => "112",
        "menu" => "KEYCODE_MENU",
        "power" => "KEYCODE_POWER",
        "volume_up" => "KEYCODE_VOLUME_UP",
        "volume_down" => "KEYCODE_VOLUME_DOWN",
        "mute" => "KEYCODE_VOLUME_MUTE",
        "lock" => "26",
        _ => return None,
    })
}

/// Swipe end point for a scroll: the finger moves against the content direction.
pub fn scroll_target(from: ScreenPoint, direction: ScrollDirection) -> ScreenPoint {
    match direction {
        ScrollDirection::Up => ScreenPoint::new(from.x, from.y + SCROLL_DISTANCE),
        ScrollDirection::Down => ScreenPoint::new(from.x, from.y - SCROLL_DISTANCE),
        ScrollDirection::Left => ScreenPoint::new(from.x + SCROLL_DISTANCE, from.y),
        ScrollDirection::Right => ScreenPoint::new(from.x - SCROLL_DISTANCE, from.y),
    }
}

#[async_trait]
impl Operator for AdbOperator {
    fn name(&self) -> &str {
        "adb"
    }

    fn action_spaces(&self) -> &'static [&'static str] {
        ADB_ACTION_SPACES
    }

    async fn screenshot(&self) -> PilotResult<ScreenshotOutput> {
        let args: Vec<String> = ["-s", &self.device_id, "exec-out", "screencap", "-p"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let image_bytes = self
            .shell
            .run(&args, self.screencap_timeout)
            .await
            .map_err(|e| PilotError::Capture(format!("screencap on {}: {e}", self.device_id)))?;
        if image_bytes.is_empty() {
            return Err(PilotError::Capture(format!("screencap on {} returned no data", self.device_id)));
        }
        tracing::info!(bytes = image_bytes.len(), device = %self.device_id, "[adb] screenshot");
        Ok(ScreenshotOutput {
            image_bytes,
            encoding: ImageEncoding::Png,
            scale_factor: 1.0,
        })
    }

    async fn execute(&self, action: &ParsedAction) -> PilotResult<()> {
        tracing::info!(?action, device = %self.device_id, "[adb] execute");
        match action {
            ParsedAction::Click { point } => self.tap(*point).await,
            ParsedAction::Drag { start, end } => self.swipe("swipe", *start, *end, SWIPE_DURATION_MS).await,
            ParsedAction::Scroll { point, direction } => {
                let Some(from) = point else {
                    return Err(PilotError::execution("scroll", "the start_box is required for scroll"));
                };
                let to = scroll_target(*from, *direction);
                self.swipe("scroll", *from, to, SCROLL_DURATION_MS).await
            }
            ParsedAction::Type { content } => {
                if content.is_empty() {
                    tracing::warn!("[adb] type action without content");
                    return Ok(());
                }
                self.type_text(content).await
            }
            ParsedAction::Hotkey { key } | ParsedAction::PressKey { key } => match keycode(key) {
                Some(code) => self.keyevent("hotkey", code).await,
                None => {
                    tracing::warn!(key = %key, "[adb] unknown key ignored");
                    Ok(())
                }
            },
            ParsedAction::OpenApp { package_name } => self
                .shell(
                    "open_app",
                    &["monkey", "-p", package_name.as_str(), "-c", "android.intent.category.LAUNCHER", "1"],
                )
                .await
                .map(|_| ()),
            ParsedAction::Wait => {
                tokio::time::sleep(WAIT).await;
                Ok(())
            }
            other => {
                tracing::warn!(action = other.action_type(), "[adb] unsupported action ignored");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// Records every invocation; `ime list -a` answers with `ime_list`.
    struct FakeShell {
        calls: StdMutex<Vec<String>>,
        ime_list: StdMutex<String>,
        screencap: Vec<u8>,
    }

    impl FakeShell {
        fn new(ime_list: &str) -> Arc<Self> {
            Arc::new(Self {
                calls: StdMutex::new(Vec::new()),
                ime_list: StdMutex::new(ime_list.to_string()),
                screencap: vec![0x89, b'P', b'N', b'G'],
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn set_ime_list(&self, list: &str) {
            *self.ime_list.lock().unwrap() = list.to_string();
        }
    }

    #[async_trait]
    impl DeviceShell for FakeShell {
        async fn run(&self, args: &[String], _timeout: Duration) -> PilotResult<Vec<u8>> {
            let line = args.join(" ");
            self.calls.lock().unwrap().push(line.clone());
            if line.ends_with("ime list -a") {
                return Ok(self.ime_list.lock().unwrap().clone().into_bytes());
            }
            if line.ends_with("screencap -p") {
                return Ok(self.screencap.clone());
            }
            if line == "devices" {
                return Ok(b"List of devices attached\nemulator-5554\tdevice\nR58M\tdevice\n\n".to_vec());
            }
            Ok(Vec::new())
        }
    }

    fn operator(shell: Arc<FakeShell>) -> AdbOperator {
        AdbOperator::new("emu", shell, &AdbConfig::default())
    }

    #[tokio::test]
    async fn test_click_taps_point() {
        let shell = FakeShell::new("");
        let op = operator(shell.clone());
        op.execute(&ParsedAction::Click { point: ScreenPoint::new(594, 1320) }).await.unwrap();
        assert_eq!(shell.calls(), vec!["-s emu shell input tap 594 1320"]);
    }

    #[tokio::test]
    async fn test_hotkey_keycodes() {
        let shell = FakeShell::new("");
        let op = operator(shell.clone());
        for key in ["enter", "backspace", "lock", "mute"] {
            op.execute(&ParsedAction::Hotkey { key: key.into() }).await.unwrap();
        }
        op.execute(&ParsedAction::PressKey { key: "home".into() }).await.unwrap();
        op.execute(&ParsedAction::Hotkey { key: "f13".into() }).await.unwrap();
        assert_eq!(
            shell.calls(),
            vec![
                "-s emu shell input keyevent KEYCODE_ENTER",
                "-s emu shell input keyevent 67",
                "-s emu shell input keyevent 26",
                "-s emu shell input keyevent KEYCODE_VOLUME_MUTE",
                "-s emu shell input keyevent KEYCODE_HOME",
            ]
        );
    }

    #[tokio::test]
    async fn test_scroll_swipes_against_direction() {
        let shell = FakeShell::new("");
        let op = operator(shell.clone());
        op.execute(&ParsedAction::Scroll {
            point: Some(ScreenPoint::new(500, 1000)),
            direction: ScrollDirection::Down,
        })
        .await
        .unwrap();
        let err = op
            .execute(&ParsedAction::Scroll { point: None, direction: ScrollDirection::Up })
            .await
            .unwrap_err();
        assert!(matches!(err, PilotError::Execution { .. }));
        assert!(err.to_string().contains("start_box"));
        assert_eq!(shell.calls(), vec!["-s emu shell input swipe 500 1000 500 800 100"]);
        assert_eq!(
            scroll_target(ScreenPoint::new(10, 10), ScrollDirection::Left),
            ScreenPoint::new(210, 10)
        );
    }

    #[tokio::test]
    async fn test_type_broadcasts_base64() {
        let shell = FakeShell::new("com.android.adbkeyboard/.AdbIME\n");
        let op = operator(shell.clone());
        op.execute(&ParsedAction::Type { content: "hi\n".into() }).await.unwrap();
        let calls = shell.calls();
        assert_eq!(calls[0], "-s emu shell ime list -a");
        assert_eq!(calls[1], "-s emu shell ime enable com.android.adbkeyboard/.AdbIME");
        assert_eq!(calls[2], "-s emu shell ime set com.android.adbkeyboard/.AdbIME");
        let dels = calls.iter().filter(|c| c.ends_with("KEYCODE_DEL")).count();
        assert_eq!(dels, 50);
        assert_eq!(
            calls.last().unwrap(),
            "-s emu shell am broadcast -a ADB_INPUT_B64 --es msg 'aGk='"
        );
    }

    #[tokio::test]
    async fn test_type_without_adb_keyboard_fails() {
        let shell = FakeShell::new("com.google.android.inputmethod.latin/.LatinIME\n");
        let op = operator(shell.clone());
        let err = op.execute(&ParsedAction::Type { content: "hi".into() }).await.unwrap_err();
        assert!(matches!(err, PilotError::Execution { .. }));
        assert!(err.to_string().contains("ADB keyboard input method is not installed"));
        assert_eq!(shell.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_keyboard_installed_mid_run_is_picked_up() {
        let shell = FakeShell::new("com.google.android.inputmethod.latin/.LatinIME\n");
        let op = operator(shell.clone());
        let typed = ParsedAction::Type { content: "hi".into() };
        assert!(op.execute(&typed).await.is_err());

        shell.set_ime_list("com.android.adbkeyboard/.AdbIME\n");
        op.execute(&typed).await.unwrap();
        let lists = shell.calls().iter().filter(|c| c.ends_with("ime list -a")).count();
        assert_eq!(lists, 2);
        assert!(shell.calls().last().unwrap().ends_with("--es msg 'aGk='"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_command_times_out() {
        let shell = AdbShell::new("sleep");
        let started = std::time::Instant::now();
        let err = shell
            .run(&["5".to_string()], Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, PilotError::Transport(_)));
        assert!(err.to_string().contains("timed out"), "{err}");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_nonzero_exit_is_transport_error() {
        let err = AdbShell::new("false").run(&[], Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, PilotError::Transport(_)));
        assert!(err.to_string().contains("exited with"), "{err}");
    }

    #[tokio::test]
    async fn test_open_app_and_swipe() {
        let shell = FakeShell::new("");
        let op = operator(shell.clone());
        op.execute(&ParsedAction::OpenApp { package_name: "com.android.settings".into() })
            .await
            .unwrap();
        op.execute(&ParsedAction::Drag { start: ScreenPoint::new(1, 2), end: ScreenPoint::new(3, 4) })
            .await
            .unwrap();
        assert_eq!(
            shell.calls(),
            vec![
                "-s emu shell monkey -p com.android.settings -c android.intent.category.LAUNCHER 1",
                "-s emu shell input swipe 1 2 3 4 300",
            ]
        );
    }

    #[tokio::test]
    async fn test_screenshot_is_png_at_scale_one() {
        let shell = FakeShell::new("");
        let op = operator(shell.clone());
        let shot = op.screenshot().await.unwrap();
        assert_eq!(shot.encoding, ImageEncoding::Png);
        assert_eq!(shot.scale_factor, 1.0);
        assert_eq!(shell.calls(), vec!["-s emu exec-out screencap -p"]);
    }

    #[tokio::test]
    async fn test_discover_picks_first_device() {
        let shell = FakeShell::new("");
        let id = discover_device(shell.as_ref(), Duration::from_secs(1)).await.unwrap();
        assert_eq!(id, "emulator-5554");
        assert!(parse_device_list("List of devices attached\n\n").is_empty());
    }
}
