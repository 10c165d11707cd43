use std::sync::Arc;

use async_trait::async_trait;
use log::warn;

use super::AdbDevice;
use crate::host::{Gesture, GestureDispatcher, ScreenCapture, ScreenState};

pub mod keycode {
    pub const HOME: u32 = 3;
    pub const BACK: u32 = 4;
    pub const ENTER: u32 = 66;
    pub const ESCAPE: u32 = 111;
}

/// Escapes text for `input text`, which splits on spaces and runs through
/// the device shell.
pub fn escape_input_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 2);
    for c in text.chars() {
        match c {
            ' ' => out.push_str("%s"),
            '\n' | '\r' => out.push_str("%s"),
            '\\' | '\'' | '"' | '`' | '$' | '&' | '|' | ';' | '<' | '>' | '(' | ')' | '*' | '?' | '~' | '#' | '%' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

fn gesture_args(gesture: &Gesture) -> Vec<String> {
    let s = |v: &[&dyn ToString]| v.iter().map(|x| x.to_string()).collect::<Vec<_>>();
    match gesture {
        Gesture::Tap { x, y } => s(&[&"input", &"tap", x, y]),
        Gesture::LongPress { x, y, duration_ms } => s(&[&"input", &"swipe", x, y, x, y, duration_ms]),
        Gesture::Swipe { from, to, duration_ms } => {
            s(&[&"input", &"swipe", &from.0, &from.1, &to.0, &to.1, duration_ms])
        }
        Gesture::Back => s(&[&"input", &"keyevent", &keycode::BACK]),
        Gesture::Home => s(&[&"input", &"keyevent", &keycode::HOME]),
        Gesture::Enter => s(&[&"input", &"keyevent", &keycode::ENTER]),
        Gesture::DismissKeyboard => s(&[&"input", &"keyevent", &keycode::ESCAPE]),
        Gesture::OpenApp { package } => s(&[
            &"monkey",
            &"-p",
            package,
            &"-c",
            &"android.intent.category.LAUNCHER",
            &"1",
        ]),
    }
}

#[async_trait]
impl ScreenCapture for AdbDevice {
    async fn capture_screen_state(&self) -> Option<ScreenState> {
        let png = match self.exec_out(&["screencap", "-p"]).await {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => {
                warn!("screencap returned no data");
                return None;
            }
            Err(e) => {
                warn!("screencap failed: {}", e);
                return None;
            }
        };
        match image::load_from_memory(&png) {
            Ok(img) => Some(ScreenState {
                width: img.width() as i32,
                height: img.height() as i32,
                pixels: Some(Arc::new(png)),
            }),
            Err(e) => {
                // Secure windows come back as unreadable frames.
                warn!("screencap produced an undecodable image: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl GestureDispatcher for AdbDevice {
    async fn dispatch_gesture(&self, gesture: Gesture) -> bool {
        let args = gesture_args(&gesture);
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        match self.shell(&refs).await {
            Ok(out) if out.contains("No activities found") || out.contains("Error") => {
                warn!("Gesture {:?} rejected: {}", gesture, out.trim());
                false
            }
            Ok(_) => true,
            Err(e) => {
                warn!("Gesture {:?} failed: {}", gesture, e);
                false
            }
        }
    }

    async fn dispatch_text_entry(&self, text: &str) -> bool {
        if text.is_empty() {
            return true;
        }
        let escaped = escape_input_text(text);
        match self.shell(&["input", "text", &escaped]).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Text entry failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_is_escaped_for_the_device_shell() {
        assert_eq!(escape_input_text("hello world"), "hello%sworld");
        assert_eq!(escape_input_text("a&b's"), "a\\&b\\'s");
        assert_eq!(escape_input_text("50%"), "50\\%");
    }

    #[test]
    fn gestures_map_to_input_commands() {
        assert_eq!(gesture_args(&Gesture::Tap { x: 200, y: 140 }), vec!["input", "tap", "200", "140"]);
        assert_eq!(
            gesture_args(&Gesture::LongPress { x: 5, y: 6, duration_ms: 800 }),
            vec!["input", "swipe", "5", "6", "5", "6", "800"]
        );
        assert_eq!(gesture_args(&Gesture::Back), vec!["input", "keyevent", "4"]);
        assert_eq!(
            gesture_args(&Gesture::OpenApp { package: "com.android.settings".to_string() })[..3],
            ["monkey", "-p", "com.android.settings"]
        );
    }
}
