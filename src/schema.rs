use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    Button,
    Input,
    Text,
    Image,
    Switch,
    Checkbox,
    ListItem,
    Tab,
    Unknown,
}

impl ElementType {
    /// Prefix used when minting element ids (`btn_1`, `input_2`, ...).
    pub fn id_prefix(&self) -> &'static str {
        match self {
            Self::Button => "btn",
            Self::Input => "input",
            Self::Text => "text",
            Self::Image => "img",
            Self::Switch => "switch",
            Self::Checkbox => "checkbox",
            Self::ListItem => "item",
            Self::Tab => "tab",
            Self::Unknown => "el",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        let prefix = id.rsplit_once('_').map(|(p, _)| p)?;
        let kind = match prefix {
            "btn" => Self::Button,
            "input" => Self::Input,
            "text" => Self::Text,
            "img" => Self::Image,
            "switch" => Self::Switch,
            "checkbox" => Self::Checkbox,
            "item" => Self::ListItem,
            "tab" => Self::Tab,
            "el" => Self::Unknown,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Button => "button",
            Self::Input => "input",
            Self::Text => "text",
            Self::Image => "image",
            Self::Switch => "switch",
            Self::Checkbox => "checkbox",
            Self::ListItem => "list_item",
            Self::Tab => "tab",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementSource {
    Tree,
    Ocr,
}

/// Screen rectangle in pixels, right/bottom exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self { left, top, right, bottom }
    }

    pub fn width(&self) -> i32 {
        (self.right - self.left).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.bottom - self.top).max(0)
    }

    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn center(&self) -> (i32, i32) {
        (self.left + self.width() / 2, self.top + self.height() / 2)
    }

    pub fn intersection_area(&self, other: &Rect) -> i64 {
        let w = (self.right.min(other.right) - self.left.max(other.left)).max(0) as i64;
        let h = (self.bottom.min(other.bottom) - self.top.max(other.top)).max(0) as i64;
        w * h
    }

    /// Fraction of `self` covered by `other`.
    pub fn covered_by(&self, other: &Rect) -> f64 {
        let area = self.area();
        if area == 0 {
            return 0.0;
        }
        self.intersection_area(other) as f64 / area as f64
    }

    pub fn center_distance(&self, other: &Rect) -> f64 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        (((ax - bx) as f64).powi(2) + ((ay - by) as f64).powi(2)).sqrt()
    }

    pub fn clamp_to(&self, width: i32, height: i32) -> Rect {
        Rect {
            left: self.left.clamp(0, width),
            top: self.top.clamp(0, height),
            right: self.right.clamp(0, width),
            bottom: self.bottom.clamp(0, height),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrollRange {
    pub current: i32,
    pub max: i32,
}

/// Element as reported by an introspection provider or OCR, before ids exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawElement {
    pub element_type: ElementType,
    pub text: String,
    pub bounds: Rect,
    #[serde(default)]
    pub clickable: bool,
    #[serde(default)]
    pub focusable: bool,
    #[serde(default)]
    pub scrollable: bool,
    #[serde(default)]
    pub checked: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub focused: bool,
    #[serde(default)]
    pub editable: bool,
    pub source: ElementSource,
    #[serde(default)]
    pub scroll_range: Option<ScrollRange>,
}

fn default_true() -> bool {
    true
}

impl RawElement {
    pub fn new(element_type: ElementType, text: &str, bounds: Rect, source: ElementSource) -> Self {
        Self {
            element_type,
            text: text.to_string(),
            bounds,
            clickable: false,
            focusable: false,
            scrollable: false,
            checked: false,
            enabled: true,
            focused: false,
            editable: false,
            source,
            scroll_range: None,
        }
    }

    pub fn clickable(mut self) -> Self {
        self.clickable = true;
        self
    }

    pub fn is_interactive(&self) -> bool {
        self.clickable || self.focusable || self.scrollable || self.editable
    }
}

/// One entry of an [`crate::element_map::ElementMap`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UIElement {
    pub id: String,
    pub element_type: ElementType,
    pub text: String,
    pub bounds: Rect,
    pub clickable: bool,
    pub focusable: bool,
    pub scrollable: bool,
    pub checked: bool,
    pub enabled: bool,
    pub focused: bool,
    pub editable: bool,
    pub source: ElementSource,
    pub scroll_range: Option<ScrollRange>,
}

impl UIElement {
    pub fn from_raw(id: String, raw: RawElement) -> Self {
        Self {
            id,
            element_type: raw.element_type,
            text: raw.text,
            bounds: raw.bounds,
            clickable: raw.clickable,
            focusable: raw.focusable,
            scrollable: raw.scrollable,
            checked: raw.checked,
            enabled: raw.enabled,
            focused: raw.focused,
            editable: raw.editable,
            source: raw.source,
            scroll_range: raw.scroll_range,
        }
    }

    pub fn same_identity(&self, other: &UIElement) -> bool {
        self.element_type == other.element_type
            && self.text.trim().eq_ignore_ascii_case(other.text.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_prefix_round_trips_to_type() {
        for kind in [ElementType::Button, ElementType::Switch, ElementType::ListItem] {
            let id = format!("{}_3", kind.id_prefix());
            assert_eq!(ElementType::from_id(&id), Some(kind));
        }
        assert_eq!(ElementType::from_id("nonsense"), None);
    }

    #[test]
    fn rect_geometry() {
        let a = Rect::new(0, 0, 100, 100);
        let b = Rect::new(50, 50, 150, 150);
        assert_eq!(a.intersection_area(&b), 2500);
        assert!((a.covered_by(&b) - 0.25).abs() < f64::EPSILON);
        assert_eq!(a.center(), (50, 50));
        assert!(Rect::new(10, 10, 10, 40).is_empty());
    }
}
