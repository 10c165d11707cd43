//! Seams to the host platform. The loop receives these as trait objects and
//! never reaches for process-wide singletons.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};

use crate::element_map::{ElementMap, ElementMapper};
use crate::schema::RawElement;

/// A captured frame. `pixels` is PNG-encoded when present.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenState {
    pub pixels: Option<Arc<Vec<u8>>>,
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Gesture {
    Tap { x: i32, y: i32 },
    LongPress { x: i32, y: i32, duration_ms: u64 },
    Swipe { from: (i32, i32), to: (i32, i32), duration_ms: u64 },
    Back,
    Home,
    Enter,
    DismissKeyboard,
    OpenApp { package: String },
}

#[async_trait]
pub trait ScreenCapture: Send + Sync {
    /// `None` means no capture is possible right now (accessibility-only mode).
    async fn capture_screen_state(&self) -> Option<ScreenState>;
}

#[async_trait]
pub trait UiInspector: Send + Sync {
    /// Visible elements from the host's structural tree. Empty on failure.
    async fn extract_structural_elements(&self) -> Vec<RawElement>;
}

#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize_text(&self, image: &[u8]) -> anyhow::Result<Vec<RawElement>>;
}

#[async_trait]
pub trait GestureDispatcher: Send + Sync {
    /// Single-shot; completes once the gesture has been delivered or rejected.
    async fn dispatch_gesture(&self, gesture: Gesture) -> bool;
    async fn dispatch_text_entry(&self, text: &str) -> bool;
}

/// Recognizer for hosts without OCR.
pub struct NoTextRecognizer;

#[async_trait]
impl TextRecognizer for NoTextRecognizer {
    async fn recognize_text(&self, _image: &[u8]) -> anyhow::Result<Vec<RawElement>> {
        Ok(Vec::new())
    }
}

/// Everything the loop needs from the host platform.
#[derive(Clone)]
pub struct Host {
    pub screen: Arc<dyn ScreenCapture>,
    pub inspector: Arc<dyn UiInspector>,
    pub ocr: Arc<dyn TextRecognizer>,
    pub dispatcher: Arc<dyn GestureDispatcher>,
}

/// Result of one full perception pass.
#[derive(Debug, Clone)]
pub struct Observation {
    pub screen: Option<ScreenState>,
    pub map: ElementMap,
    pub structural_count: usize,
}

impl Observation {
    pub fn screenshot(&self) -> Option<Arc<Vec<u8>>> {
        self.screen.as_ref().and_then(|s| s.pixels.clone())
    }
}

impl Host {
    /// Screenshot + tree + OCR merged into one map. Never fails.
    pub async fn observe(&self, mapper: &ElementMapper, fallback: (i32, i32)) -> Observation {
        let screen = self.screen.capture_screen_state().await;
        let structural = self.inspector.extract_structural_elements().await;
        let structural_count = structural.len();

        let ocr = match screen.as_ref().and_then(|s| s.pixels.as_ref()) {
            Some(pixels) => match self.ocr.recognize_text(pixels).await {
                Ok(found) => found,
                Err(e) => {
                    debug!("OCR failed, continuing without it: {}", e);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let (w, h) = screen
            .as_ref()
            .map(|s| (s.width, s.height))
            .unwrap_or(fallback);
        if structural_count == 0 {
            warn!("Structural extraction returned nothing; map built from OCR only");
        }
        let map = mapper.generate(structural, ocr, w, h);
        Observation {
            screen,
            map,
            structural_count,
        }
    }

    /// Tree-only refresh for the background effect check.
    pub async fn refresh_map(&self, mapper: &ElementMapper, width: i32, height: i32) -> ElementMap {
        let structural = self.inspector.extract_structural_elements().await;
        mapper.generate(structural, Vec::new(), width, height)
    }
}
