use std::time::Duration;

use log::debug;
use tokio::time::{sleep, Instant};

use crate::controller::loop_detector::RecoveryAction;
use crate::element_map::{ElementMap, ElementMapper};
use crate::host::{Gesture, Host};

/// Polls the tree fingerprint until two consecutive samples match or
/// `max_wait` elapses. Returns whether the screen settled.
pub async fn wait_for_settle(
    host: &Host,
    mapper: &ElementMapper,
    screen: (i32, i32),
    poll: Duration,
    max_wait: Duration,
) -> bool {
    let deadline = Instant::now() + max_wait;
    let mut previous: Option<u64> = None;
    loop {
        let fingerprint = host.refresh_map(mapper, screen.0, screen.1).await.fingerprint();
        if previous == Some(fingerprint) {
            return true;
        }
        previous = Some(fingerprint);
        if Instant::now() + poll > deadline {
            debug!("Screen did not settle within {:?}", max_wait);
            return false;
        }
        sleep(poll).await;
    }
}

/// Physical gesture for a stagnation recovery. Scroll reveals content below
/// using the largest scrollable container, or the screen center.
pub fn recovery_gesture(action: RecoveryAction, map: &ElementMap) -> Gesture {
    match action {
        RecoveryAction::DismissKeyboard => Gesture::DismissKeyboard,
        RecoveryAction::NavigateBack => Gesture::Back,
        RecoveryAction::Scroll => {
            let area = map
                .elements()
                .iter()
                .filter(|e| e.scrollable)
                .max_by_key(|e| e.bounds.area())
                .map(|e| e.bounds)
                .unwrap_or_else(|| map.screen_rect());
            let (cx, cy) = area.center();
            let dy = area.height() / 4;
            Gesture::Swipe {
                from: (cx, cy + dy),
                to: (cx, cy - dy),
                duration_ms: 350,
            }
        }
    }
}

pub fn recovery_label(action: RecoveryAction) -> &'static str {
    match action {
        RecoveryAction::DismissKeyboard => "dismissing the keyboard",
        RecoveryAction::Scroll => "scrolling to reveal more content",
        RecoveryAction::NavigateBack => "navigating back",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ElementSource, ElementType, RawElement, Rect};
    use crate::test_support::ScriptedHost;

    #[tokio::test]
    async fn settles_on_two_identical_samples() {
        let host = ScriptedHost::static_screen(vec![RawElement::new(
            ElementType::Text,
            "Hello",
            Rect::new(0, 0, 100, 40),
            ElementSource::Tree,
        )]);
        let settled = wait_for_settle(
            &host.host(),
            &ElementMapper::default(),
            (1080, 2400),
            Duration::from_millis(1),
            Duration::from_millis(200),
        )
        .await;
        assert!(settled);
        assert_eq!(host.extractions(), 2);
    }

    #[test]
    fn scroll_recovery_uses_biggest_scrollable() {
        let mut list = RawElement::new(ElementType::Unknown, "", Rect::new(0, 400, 1080, 2000), ElementSource::Tree);
        list.scrollable = true;
        let map = ElementMapper::default().generate(vec![list], vec![], 1080, 2400);
        match recovery_gesture(RecoveryAction::Scroll, &map) {
            Gesture::Swipe { from, to, .. } => {
                assert_eq!(from, (540, 1600));
                assert_eq!(to, (540, 800));
            }
            other => panic!("unexpected gesture {:?}", other),
        }
        assert_eq!(recovery_gesture(RecoveryAction::NavigateBack, &map), Gesture::Back);
    }
}
