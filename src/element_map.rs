use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::hash::{Hash, Hasher};

use crate::schema::{ElementSource, ElementType, RawElement, Rect, UIElement};

/// Grid cell size used when quantizing element centers for structural hashing.
pub const STRUCTURAL_GRID_PX: i32 = 100;
const STRUCTURAL_TEXT_CHARS: usize = 16;
const PROMPT_TEXT_CHARS: usize = 80;

/// Per-iteration snapshot of what is on screen. Ids are only meaningful within
/// the map that minted them.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementMap {
    elements: Vec<UIElement>,
    screen_width: i32,
    screen_height: i32,
    serialized: String,
}

impl ElementMap {
    pub fn new(elements: Vec<UIElement>, screen_width: i32, screen_height: i32) -> Self {
        let serialized = serialize(&elements);
        Self {
            elements,
            screen_width,
            screen_height,
            serialized,
        }
    }

    pub fn empty(screen_width: i32, screen_height: i32) -> Self {
        Self::new(Vec::new(), screen_width, screen_height)
    }

    pub fn elements(&self) -> &[UIElement] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn screen_width(&self) -> i32 {
        self.screen_width
    }

    pub fn screen_height(&self) -> i32 {
        self.screen_height
    }

    pub fn screen_rect(&self) -> Rect {
        Rect::new(0, 0, self.screen_width, self.screen_height)
    }

    /// Same map without OCR-derived entries. Tree ids are unchanged because
    /// OCR elements are always appended after structural ones.
    pub fn tree_only(&self) -> ElementMap {
        let elements = self
            .elements
            .iter()
            .filter(|e| e.source == ElementSource::Tree)
            .cloned()
            .collect();
        ElementMap::new(elements, self.screen_width, self.screen_height)
    }

    pub fn find(&self, id: &str) -> Option<&UIElement> {
        self.elements.iter().find(|e| e.id == id)
    }

    /// Candidates to offer the model when `missing_id` cannot be resolved:
    /// same type as the id prefix suggests, otherwise anything clickable.
    pub fn alternatives_for(&self, missing_id: &str, limit: usize) -> Vec<&UIElement> {
        let wanted = ElementType::from_id(missing_id);
        self.elements
            .iter()
            .filter(|e| match wanted {
                Some(kind) => e.element_type == kind,
                None => e.clickable,
            })
            .take(limit)
            .collect()
    }

    pub fn focused_input(&self) -> Option<&UIElement> {
        self.elements
            .iter()
            .find(|e| e.focused && (e.editable || e.element_type == ElementType::Input))
    }

    pub fn contains_text(&self, needle: &str) -> bool {
        let needle = needle.trim().to_lowercase();
        if needle.is_empty() {
            return false;
        }
        self.elements
            .iter()
            .any(|e| e.text.to_lowercase().contains(&needle))
    }

    /// Deterministic text form used for prompting, diffing and hashing.
    pub fn to_prompt_text(&self) -> &str {
        &self.serialized
    }

    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.serialized.hash(&mut hasher);
        hasher.finish()
    }

    /// Layout hash tolerant to small shifts and long-text churn.
    pub fn structural_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for e in &self.elements {
            let (cx, cy) = e.bounds.center();
            e.element_type.hash(&mut hasher);
            (cx / STRUCTURAL_GRID_PX).hash(&mut hasher);
            (cy / STRUCTURAL_GRID_PX).hash(&mut hasher);
            let short: String = e.text.trim().chars().take(STRUCTURAL_TEXT_CHARS).collect();
            short.to_lowercase().hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Jaccard similarity of the visible text sets of two maps.
    pub fn text_overlap(&self, other: &ElementMap) -> f64 {
        let a = text_set(self);
        let b = text_set(other);
        if a.is_empty() && b.is_empty() {
            return 1.0;
        }
        let inter = a.intersection(&b).count() as f64;
        let union = a.union(&b).count() as f64;
        inter / union
    }

    pub fn summary(&self, limit: usize) -> String {
        let texts: Vec<&str> = self
            .elements
            .iter()
            .map(|e| e.text.trim())
            .filter(|t| !t.is_empty())
            .take(limit)
            .collect();
        if texts.is_empty() {
            "no readable elements".to_string()
        } else {
            texts.join(", ")
        }
    }
}

fn text_set(map: &ElementMap) -> HashSet<String> {
    map.elements
        .iter()
        .map(|e| e.text.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

fn serialize(elements: &[UIElement]) -> String {
    let mut out = String::new();
    for e in elements {
        let (cx, cy) = e.bounds.center();
        let text: String = e.text.trim().chars().take(PROMPT_TEXT_CHARS).collect();
        let _ = write!(
            out,
            "[{}] {} \"{}\" @({},{}) {}x{}",
            e.id,
            e.element_type.as_str(),
            text.replace('"', "'"),
            cx,
            cy,
            e.bounds.width(),
            e.bounds.height()
        );
        let mut flags = Vec::new();
        if e.clickable {
            flags.push("clickable");
        }
        if e.editable {
            flags.push("editable");
        }
        if e.scrollable {
            flags.push("scrollable");
        }
        if e.checked {
            flags.push("checked");
        }
        if e.focused {
            flags.push("focused");
        }
        if !e.enabled {
            flags.push("disabled");
        }
        if e.source == ElementSource::Ocr {
            flags.push("ocr");
        }
        if !flags.is_empty() {
            let _ = write!(out, " {}", flags.join(","));
        }
        if let Some(range) = e.scroll_range {
            let _ = write!(out, " scroll={}/{}", range.current, range.max);
        }
        out.push('\n');
    }
    out
}

/// Merges structural and OCR elements into an [`ElementMap`].
#[derive(Debug, Clone)]
pub struct ElementMapper {
    max_elements: usize,
}

impl Default for ElementMapper {
    fn default() -> Self {
        Self { max_elements: 200 }
    }
}

impl ElementMapper {
    pub fn new(max_elements: usize) -> Self {
        Self {
            max_elements: max_elements.max(1),
        }
    }

    pub fn generate(
        &self,
        structural: Vec<RawElement>,
        ocr: Vec<RawElement>,
        screen_width: i32,
        screen_height: i32,
    ) -> ElementMap {
        let screen_area = screen_width as i64 * screen_height as i64;
        let mut kept: Vec<RawElement> = Vec::with_capacity(structural.len() + ocr.len());

        for mut raw in structural {
            raw.bounds = raw.bounds.clamp_to(screen_width, screen_height);
            raw.text = raw.text.trim().to_string();
            if raw.bounds.is_empty() || is_decorative(&raw) {
                continue;
            }
            if kept
                .iter()
                .any(|k| k.bounds == raw.bounds && k.text == raw.text)
            {
                continue;
            }
            kept.push(raw);
        }

        let structural_count = kept.len();
        for mut raw in ocr {
            raw.bounds = raw.bounds.clamp_to(screen_width, screen_height);
            raw.text = raw.text.trim().to_string();
            if raw.bounds.is_empty() || raw.text.is_empty() {
                continue;
            }
            let shadowed = kept[..structural_count].iter().any(|s| {
                let meaningful = !s.text.is_empty() || s.is_interactive();
                let not_container = screen_area == 0 || s.bounds.area() * 4 <= screen_area;
                meaningful && not_container && raw.bounds.covered_by(&s.bounds) >= 0.5
            });
            if shadowed {
                continue;
            }
            raw.source = ElementSource::Ocr;
            kept.push(raw);
        }

        let kept = self.cap(kept);

        let mut counters: HashMap<ElementType, usize> = HashMap::new();
        let elements = kept
            .into_iter()
            .map(|raw| {
                let n = counters.entry(raw.element_type).or_insert(0);
                *n += 1;
                let id = format!("{}_{}", raw.element_type.id_prefix(), n);
                UIElement::from_raw(id, raw)
            })
            .collect();

        ElementMap::new(elements, screen_width, screen_height)
    }

    fn cap(&self, kept: Vec<RawElement>) -> Vec<RawElement> {
        if kept.len() <= self.max_elements {
            return kept;
        }
        let mut order: Vec<usize> = (0..kept.len()).collect();
        order.sort_by_key(|&i| (std::cmp::Reverse(priority(&kept[i])), i));
        let mut chosen: Vec<usize> = order.into_iter().take(self.max_elements).collect();
        chosen.sort_unstable();
        let chosen: HashSet<usize> = chosen.into_iter().collect();
        kept.into_iter()
            .enumerate()
            .filter(|(i, _)| chosen.contains(i))
            .map(|(_, raw)| raw)
            .collect()
    }
}

fn priority(raw: &RawElement) -> u8 {
    if raw.is_interactive() {
        2
    } else if !raw.text.is_empty() {
        1
    } else {
        0
    }
}

// Layout containers with nothing to read or press.
fn is_decorative(raw: &RawElement) -> bool {
    raw.element_type == ElementType::Unknown && raw.text.is_empty() && !raw.is_interactive()
}
