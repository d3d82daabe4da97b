//! Content region views and renderers.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use serde_json::Value;

/// Banner shown above a cached image.
pub const CACHED_IMAGE_BANNER: &str = "Offline or fetch failed – showing cached content.";
/// Banner shown above a cached raw payload.
pub const CACHED_RAW_BANNER: &str = "Offline or fetch failed – showing last cached response.";

/// Returns the image address carried by a payload, if it is a string.
#[must_use]
pub fn image_address(payload: &Value) -> Option<&str> {
    payload.get("message").and_then(Value::as_str)
}

/// Pretty-prints a payload the way it is shown to the user.
#[must_use]
pub fn pretty_payload(payload: &Value) -> String {
    serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string())
}

/// What the content region currently shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    /// A request is in flight.
    Loading,
    /// A freshly fetched image with the raw response behind a disclosure.
    Image {
        /// Image address.
        src: String,
        /// Pretty-printed payload.
        payload: String,
    },
    /// A freshly fetched payload without a usable image address.
    Raw {
        /// Pretty-printed payload.
        payload: String,
    },
    /// The cached image, shown after a failed fetch.
    CachedImage {
        /// Image address.
        src: String,
    },
    /// The cached payload without a usable image address.
    CachedRaw {
        /// Pretty-printed payload.
        payload: String,
    },
    /// Nothing to show; carries the failure message.
    Failed(String),
}

impl View {
    /// Builds the view for a freshly fetched payload.
    #[must_use]
    pub fn fresh(payload: &Value) -> Self {
        let pretty = pretty_payload(payload);
        match image_address(payload) {
            Some(src) => Self::Image {
                src: src.to_string(),
                payload: pretty,
            },
            None => Self::Raw { payload: pretty },
        }
    }

    /// Builds the view for a cached payload shown after a failure.
    #[must_use]
    pub fn cached(payload: &Value) -> Self {
        match image_address(payload) {
            Some(src) => Self::CachedImage {
                src: src.to_string(),
            },
            None => Self::CachedRaw {
                payload: pretty_payload(payload),
            },
        }
    }

    /// Returns the image address shown, if any.
    #[must_use]
    pub fn image(&self) -> Option<&str> {
        match self {
            Self::Image { src, .. } | Self::CachedImage { src } => Some(src),
            _ => None,
        }
    }

    /// Returns true if the view carries the offline banner.
    #[must_use]
    pub const fn is_offline(&self) -> bool {
        matches!(self, Self::CachedImage { .. } | Self::CachedRaw { .. })
    }

    /// Renders the view as an HTML fragment.
    #[must_use]
    pub fn to_html(&self) -> String {
        match self {
            Self::Loading => "Loading…".to_string(),
            Self::Image { src, payload } => format!(
                "<figure><img src=\"{src}\" alt=\"Random dog\" style=\"max-width:100%;height:auto;\"/>\
                 <figcaption>Random dog from dog.ceo</figcaption></figure>\
                 <details><summary>Response</summary><pre>{payload}</pre></details>",
                src = escape_html(src),
                payload = escape_html(payload),
            ),
            Self::Raw { payload } => format!("<pre>{}</pre>", escape_html(payload)),
            Self::CachedImage { src } => format!(
                "<div style=\"color:#b26;\">{CACHED_IMAGE_BANNER}</div>\
                 <figure><img src=\"{src}\" alt=\"Cached random dog\" style=\"max-width:100%;height:auto;\"/>\
                 <figcaption>Cached random dog (dog.ceo)</figcaption></figure>",
                src = escape_html(src),
            ),
            Self::CachedRaw { payload } => format!(
                "<div style=\"color:#b26;\">{CACHED_RAW_BANNER}</div><pre>{}</pre>",
                escape_html(payload)
            ),
            Self::Failed(message) => escape_html(message),
        }
    }
}

/// Plain-text rendering, as shown in a terminal.
impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loading => write!(f, "Loading…"),
            Self::Image { src, payload } => write!(f, "Image: {src}\n\nResponse:\n{payload}"),
            Self::Raw { payload } => write!(f, "{payload}"),
            Self::CachedImage { src } => write!(f, "{CACHED_IMAGE_BANNER}\nImage: {src}"),
            Self::CachedRaw { payload } => write!(f, "{CACHED_RAW_BANNER}\n{payload}"),
            Self::Failed(message) => write!(f, "{message}"),
        }
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// The single DOM-like region the page controller writes into.
pub trait ContentRegion: Send + Sync {
    /// Replaces the region's content with `view`.
    fn render(&self, view: View);
}

/// Region that remembers every view it was given.
#[derive(Debug, Default)]
pub struct MemoryRegion {
    views: Mutex<Vec<View>>,
}

impl MemoryRegion {
    /// Creates an empty region.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the view currently shown.
    #[must_use]
    pub fn current(&self) -> Option<View> {
        self.views
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    /// Returns every view rendered so far, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<View> {
        self.views.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl ContentRegion for MemoryRegion {
    fn render(&self, view: View) {
        self.views
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(view);
    }
}

/// Region printing each view to stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalRegion;

impl ContentRegion for TerminalRegion {
    fn render(&self, view: View) {
        println!("{view}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fresh_image_view_keeps_payload() {
        let payload = json!({"message": "https://img/1.png", "status": "success"});
        let view = View::fresh(&payload);

        assert_eq!(view.image(), Some("https://img/1.png"));
        let View::Image { payload: shown, .. } = &view else {
            panic!("expected image view, got {view:?}");
        };
        let reparsed: Value = serde_json::from_str(shown).unwrap();
        assert_eq!(reparsed, payload);
        assert!(!view.is_offline());
    }

    #[test]
    fn non_string_message_renders_raw() {
        let view = View::fresh(&json!({"message": 42}));
        assert!(matches!(view, View::Raw { .. }));
        assert_eq!(view.image(), None);
        assert!(!view.to_html().contains("<img"));
    }

    #[test]
    fn cached_views_carry_banner() {
        let image = View::cached(&json!({"message": "https://img/1.png"}));
        assert!(image.is_offline());
        assert!(image.to_html().contains(CACHED_IMAGE_BANNER));
        assert!(image.to_html().contains("src=\"https://img/1.png\""));

        let raw = View::cached(&json!(["no", "message"]));
        assert!(raw.is_offline());
        assert!(raw.to_string().starts_with(CACHED_RAW_BANNER));
    }

    #[test]
    fn html_is_escaped() {
        let view = View::fresh(&json!({"message": "x\" onerror=\"alert(1)"}));
        let html = view.to_html();
        assert!(html.contains("x&quot; onerror=&quot;alert(1)"));
        assert!(!html.contains("x\" onerror"));
    }

    #[test]
    fn failed_view_is_plain_text() {
        let view = View::Failed("Failed: Request aborted".to_string());
        assert_eq!(view.to_string(), "Failed: Request aborted");
        assert_eq!(view.to_html(), "Failed: Request aborted");
    }

    #[test]
    fn memory_region_tracks_history() {
        let region = MemoryRegion::new();
        assert!(region.current().is_none());
        region.render(View::Loading);
        region.render(View::Failed("Failed: x".into()));
        assert_eq!(region.history().len(), 2);
        assert_eq!(region.current(), Some(View::Failed("Failed: x".into())));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn string_message_always_renders_image(src in ".*", status in "[a-z]{0,10}") {
                let payload = json!({"message": src, "status": status});
                let view = View::fresh(&payload);
                prop_assert_eq!(view.image(), Some(src.as_str()));
                if let View::Image { payload: shown, .. } = view {
                    let reparsed: Value = serde_json::from_str(&shown).unwrap();
                    prop_assert_eq!(reparsed, payload);
                } else {
                    prop_assert!(false, "expected image view");
                }
            }

            #[test]
            fn non_string_message_never_renders_image(n in any::<i64>(), flag in any::<bool>()) {
                for payload in [json!({"message": n}), json!({"message": flag}), json!({"status": "success"})] {
                    let view = View::fresh(&payload);
                    let is_raw = matches!(view, View::Raw { .. });
                    prop_assert!(is_raw, "expected raw view for {}", payload);
                    prop_assert!(!view.to_html().contains("<img"));
                }
            }

            #[test]
            fn escape_never_leaves_angle_brackets(s in ".*") {
                let escaped = escape_html(&s);
                prop_assert!(!escaped.contains('<'));
                prop_assert!(!escaped.contains('>'));
            }
        }
    }
}
