use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use super::AdbDevice;
use crate::host::UiInspector;
use crate::schema::{ElementSource, ElementType, RawElement, Rect};

static NODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<node\s([^>]*?)/?>").expect("node pattern"));
static ATTR: Lazy<Regex> = Lazy::new(|| Regex::new(r#"([\w:-]+)="([^"]*)""#).expect("attribute pattern"));
static BOUNDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(-?\d+),(-?\d+)\]\[(-?\d+),(-?\d+)\]").expect("bounds pattern"));

const DUMP_BACKOFF: Duration = Duration::from_millis(250);

/// Maps an Android widget class name to an element type.
pub fn class_to_type(class: &str, checkable: bool, clickable: bool) -> ElementType {
    let short = class.rsplit('.').next().unwrap_or(class);
    match short {
        "EditText" | "AutoCompleteTextView" | "MultiAutoCompleteTextView" | "SearchView" => ElementType::Input,
        "Switch" | "SwitchCompat" | "SwitchMaterial" | "ToggleButton" => ElementType::Switch,
        "CheckBox" | "RadioButton" | "CheckedTextView" => ElementType::Checkbox,
        "Button" | "ImageButton" | "MaterialButton" | "FloatingActionButton" => ElementType::Button,
        "ImageView" => ElementType::Image,
        "TabView" | "TabWidget" => ElementType::Tab,
        "TextView" => {
            if clickable {
                ElementType::Button
            } else {
                ElementType::Text
            }
        }
        _ if checkable => ElementType::Checkbox,
        _ if short.contains("Tab") && clickable => ElementType::Tab,
        _ if clickable => ElementType::ListItem,
        _ => ElementType::Unknown,
    }
}

fn unescape(raw: &str) -> String {
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#10;", " ")
        .replace("&amp;", "&")
}

fn parse_bounds(raw: &str) -> Option<Rect> {
    let caps = BOUNDS.captures(raw)?;
    let n = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<i32>().ok());
    Some(Rect::new(n(1)?, n(2)?, n(3)?, n(4)?))
}

/// Turns a `uiautomator dump` into raw elements, in document order.
/// Nodes without usable bounds are dropped.
pub fn parse_hierarchy(xml: &str) -> Vec<RawElement> {
    let mut elements = Vec::new();
    for node in NODE.captures_iter(xml) {
        let attrs: HashMap<&str, &str> = ATTR
            .captures_iter(&node[1])
            .filter_map(|c| Some((c.get(1)?.as_str(), c.get(2)?.as_str())))
            .collect();
        let flag = |key: &str| attrs.get(key).is_some_and(|v| *v == "true");

        let Some(bounds) = attrs.get("bounds").and_then(|b| parse_bounds(b)) else {
            continue;
        };
        if bounds.is_empty() {
            continue;
        }

        let text = attrs.get("text").map(|t| unescape(t)).unwrap_or_default();
        let desc = attrs.get("content-desc").map(|t| unescape(t)).unwrap_or_default();
        let label = if text.trim().is_empty() { desc } else { text };

        let class = attrs.get("class").copied().unwrap_or("");
        let clickable = flag("clickable") || flag("long-clickable");
        let element_type = class_to_type(class, flag("checkable"), clickable);

        let mut element = RawElement::new(element_type, label.trim(), bounds, ElementSource::Tree);
        element.clickable = clickable;
        element.focusable = flag("focusable");
        element.focused = flag("focused");
        element.scrollable = flag("scrollable");
        element.checked = flag("checked");
        element.enabled = attrs.get("enabled").map_or(true, |v| *v == "true");
        element.editable = element_type == ElementType::Input;
        elements.push(element);
    }
    elements
}

impl AdbDevice {
    async fn dump_hierarchy(&self) -> anyhow::Result<String> {
        let raw = self.exec_out(&["uiautomator", "dump", "/dev/tty"]).await?;
        let text = String::from_utf8_lossy(&raw).to_string();
        match (text.find("<?xml").or_else(|| text.find("<hierarchy")), text.rfind("</hierarchy>")) {
            (Some(start), Some(end)) => Ok(text[start..end + "</hierarchy>".len()].to_string()),
            _ => Err(anyhow::anyhow!("uiautomator returned no hierarchy: {}", text.trim())),
        }
    }
}

#[async_trait]
impl UiInspector for AdbDevice {
    async fn extract_structural_elements(&self) -> Vec<RawElement> {
        for attempt in 1..=self.dump_retries.max(1) {
            match self.dump_hierarchy().await {
                Ok(xml) => {
                    let elements = parse_hierarchy(&xml);
                    debug!("uiautomator: {} nodes", elements.len());
                    return elements;
                }
                Err(e) => {
                    warn!("UI dump failed (attempt {}/{}): {}", attempt, self.dump_retries, e);
                    tokio::time::sleep(DUMP_BACKOFF).await;
                }
            }
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = r#"<?xml version='1.0' encoding='UTF-8' standalone='yes' ?><hierarchy rotation="0">
<node index="0" text="" resource-id="" class="android.widget.FrameLayout" package="com.android.settings" content-desc="" checkable="false" checked="false" clickable="false" enabled="true" focusable="false" focused="false" scrollable="false" long-clickable="false" password="false" selected="false" bounds="[0,0][1080,2400]">
<node index="0" text="Network &amp; internet" resource-id="android:id/title" class="android.widget.TextView" package="com.android.settings" content-desc="" checkable="false" checked="false" clickable="false" enabled="true" focusable="false" focused="false" scrollable="false" long-clickable="false" password="false" selected="false" bounds="[40,200][800,260]" />
<node index="1" text="" resource-id="android:id/switch_widget" class="android.widget.Switch" package="com.android.settings" content-desc="Wi-Fi" checkable="true" checked="false" clickable="true" enabled="true" focusable="true" focused="false" scrollable="false" long-clickable="false" password="false" selected="false" bounds="[900,300][1000,360]" />
<node index="2" text="" resource-id="com.android.settings:id/search" class="android.widget.EditText" package="com.android.settings" content-desc="" checkable="false" checked="false" clickable="true" enabled="false" focusable="true" focused="true" scrollable="false" long-clickable="false" password="false" selected="false" bounds="[0,100][1080,180]" />
<node index="3" text="" class="android.view.View" bounds="[10,10][10,10]" />
</node>
</hierarchy>"#;

    #[test]
    fn parses_settings_dump() {
        let elements = parse_hierarchy(DUMP);
        assert_eq!(elements.len(), 4);

        let title = &elements[1];
        assert_eq!(title.element_type, ElementType::Text);
        assert_eq!(title.text, "Network & internet");

        let switch = &elements[2];
        assert_eq!(switch.element_type, ElementType::Switch);
        assert_eq!(switch.text, "Wi-Fi");
        assert!(switch.clickable);
        assert_eq!(switch.bounds, Rect::new(900, 300, 1000, 360));

        let search = &elements[3];
        assert_eq!(search.element_type, ElementType::Input);
        assert!(search.editable);
        assert!(search.focused);
        assert!(!search.enabled);
    }

    #[test]
    fn class_mapping_falls_back_on_flags() {
        assert_eq!(class_to_type("android.widget.ImageButton", false, true), ElementType::Button);
        assert_eq!(class_to_type("android.widget.LinearLayout", false, true), ElementType::ListItem);
        assert_eq!(class_to_type("android.widget.LinearLayout", true, true), ElementType::Checkbox);
        assert_eq!(class_to_type("android.view.ViewGroup", false, false), ElementType::Unknown);
    }
}
