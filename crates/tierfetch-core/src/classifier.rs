//! Content-validity classification: decides whether a fetched page is real
//! content or a blocked/skeleton response that warrants escalating to the
//! next fetch tier.
//!
//! The verdict is a pure function of (content, status code). Rules are
//! checked in a fixed order and the first match wins.

use scraper::Html;

use crate::config::ClassifierConfig;

/// Markers commonly left behind by client-side loading states.
const SKELETON_INDICATORS: [&str; 6] = [
    "loading",
    "skeleton",
    "placeholder",
    "spinner",
    "shimmer",
    "pulse",
];

/// Classification result: whether to escalate, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub escalate: bool,
    pub reason: String,
}

impl Verdict {
    fn escalate(reason: impl Into<String>) -> Self {
        Self {
            escalate: true,
            reason: reason.into(),
        }
    }

    fn valid() -> Self {
        Self {
            escalate: false,
            reason: "valid content".to_string(),
        }
    }
}

/// Detects blocked responses and skeleton/placeholder markup.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    config: ClassifierConfig,
}

/// Structural features of a parsed document, gathered in one tree walk.
struct DocumentStats {
    text_length: usize,
    meaningful_elements: usize,
    div_count: usize,
}

impl Classifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    /// Classify one fetched response. `content` is `None` when the
    /// transport failed outright.
    pub fn classify(&self, content: Option<&str>, status_code: u16) -> Verdict {
        if (400..600).contains(&status_code) {
            return Verdict::escalate(format!("blocked (status={status_code})"));
        }

        let Some(content) = content else {
            return Verdict::escalate("no content");
        };

        let total_length = content.len();
        if total_length < self.config.min_content_length {
            return Verdict::escalate(format!("content too short ({total_length} bytes)"));
        }

        // html5ever is tolerant: parsing never fails, so anything past the
        // length gate gets a structural analysis.
        let document = Html::parse_document(content);
        let stats = collect_stats(&document);

        if stats.text_length < self.config.min_text_length {
            return Verdict::escalate(format!(
                "text content too short ({} chars)",
                stats.text_length
            ));
        }

        if stats.meaningful_elements < self.config.min_meaningful_elements {
            return Verdict::escalate(format!(
                "too few meaningful elements ({})",
                stats.meaningful_elements
            ));
        }

        // Text-to-markup ratio. Large pages get a halved threshold, and the
        // check only applies below 50 KB at all: big pages with heavy markup
        // (e-commerce, SPA shells) are usually valid despite a low ratio.
        let markup_length = total_length.saturating_sub(stats.text_length);
        if markup_length > 0 {
            let ratio = stats.text_length as f64 / markup_length as f64;
            let mut threshold = self.config.text_to_markup_ratio;
            if total_length > 100_000 {
                threshold *= 0.5;
            }
            if ratio < threshold && total_length < 50_000 {
                return Verdict::escalate(format!("low text-to-markup ratio ({ratio:.4})"));
            }
        }

        let lower = content.to_lowercase();
        let indicator_count = SKELETON_INDICATORS
            .iter()
            .filter(|marker| lower.contains(*marker))
            .count();
        if indicator_count >= 3 && stats.text_length < self.config.min_text_length * 2 {
            return Verdict::escalate(format!("multiple skeleton indicators ({indicator_count})"));
        }

        if stats.div_count > 20 && stats.text_length < self.config.min_text_length * 3 {
            return Verdict::escalate(format!(
                "layout-heavy, content-light ({} divs, {} chars)",
                stats.div_count, stats.text_length
            ));
        }

        Verdict::valid()
    }
}

/// Walks the parse tree once, gathering visible-text length, meaningful
/// element count, and div count.
fn collect_stats(document: &Html) -> DocumentStats {
    let mut text_length = 0usize;
    let mut separator_needed = false;
    let mut meaningful_elements = 0usize;
    let mut div_count = 0usize;

    for node in document.tree.nodes() {
        if let Some(text) = node.value().as_text() {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }
            let hidden = node.ancestors().any(|ancestor| {
                ancestor
                    .value()
                    .as_element()
                    .is_some_and(|el| matches!(el.name(), "script" | "style" | "noscript"))
            });
            if hidden {
                continue;
            }
            if separator_needed {
                text_length += 1;
            }
            text_length += trimmed.chars().count();
            separator_needed = true;
            continue;
        }

        let Some(element) = node.value().as_element() else {
            continue;
        };
        match element.name() {
            "p" | "article" | "section" | "div" => {
                if element.name() == "div" {
                    div_count += 1;
                }
                let has_own_text = node
                    .children()
                    .any(|child| child.value().as_text().is_some_and(|t| !t.trim().is_empty()));
                if has_own_text {
                    meaningful_elements += 1;
                }
            }
            "img" => {
                if element.attr("src").is_some() {
                    meaningful_elements += 1;
                }
            }
            "a" => {
                if element.attr("href").is_some() {
                    meaningful_elements += 1;
                }
            }
            _ => {}
        }
    }

    DocumentStats {
        text_length,
        meaningful_elements,
        div_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> Classifier {
        Classifier::new(ClassifierConfig::default())
    }

    /// A page that passes every rule: long, texty, enough real elements.
    fn valid_page() -> String {
        let mut html = String::from("<html><body><article>");
        for i in 0..12 {
            html.push_str(&format!(
                "<p>Paragraph {i} with a reasonable amount of visible prose content \
                 that a human reader would actually care about on this page.</p>"
            ));
        }
        html.push_str(r#"<img src="/hero.jpg"><a href="/about">About us</a>"#);
        html.push_str("</article></body></html>");
        html
    }

    #[test]
    fn blocked_status_escalates() {
        for status in [400, 403, 429, 500, 503, 599] {
            let verdict = classifier().classify(Some(&valid_page()), status);
            assert!(verdict.escalate, "status {status} should escalate");
            assert!(verdict.reason.contains("blocked"), "reason: {}", verdict.reason);
        }
    }

    #[test]
    fn missing_content_escalates() {
        let verdict = classifier().classify(None, 0);
        assert!(verdict.escalate);
        assert_eq!(verdict.reason, "no content");
    }

    #[test]
    fn short_content_always_escalates() {
        let verdict = classifier().classify(Some("<html><body>hi</body></html>"), 200);
        assert!(verdict.escalate);
        assert!(verdict.reason.contains("too short"));
    }

    #[test]
    fn blocked_check_precedes_content_checks() {
        // 503 with an empty body: the status rule must win.
        let verdict = classifier().classify(Some(""), 503);
        assert!(verdict.escalate);
        assert!(verdict.reason.contains("blocked (status=503)"));
    }

    #[test]
    fn valid_page_never_escalates() {
        let page = valid_page();
        let verdict = classifier().classify(Some(&page), 200);
        assert!(!verdict.escalate, "reason: {}", verdict.reason);
    }

    #[test]
    fn classification_is_idempotent() {
        let page = valid_page();
        let c = classifier();
        let first = c.classify(Some(&page), 200);
        let second = c.classify(Some(&page), 200);
        assert_eq!(first, second);
    }

    #[test]
    fn sparse_text_escalates() {
        // Long enough in bytes, but almost no visible text.
        let html = format!(
            "<html><body><div>{}</div><p>tiny</p></body></html>",
            "<span></span>".repeat(200)
        );
        let verdict = classifier().classify(Some(&html), 200);
        assert!(verdict.escalate);
        assert!(verdict.reason.contains("text content too short"));
    }

    #[test]
    fn few_meaningful_elements_escalates() {
        // Plenty of text, but all of it inside one span, padded past the
        // content-length gate.
        let filler = "lorem ipsum dolor sit amet ".repeat(20);
        let html = format!(
            "<html><body><span>{filler}</span>{}</body></html>",
            "<br>".repeat(300)
        );
        let verdict = classifier().classify(Some(&html), 200);
        assert!(verdict.escalate);
        assert!(verdict.reason.contains("meaningful elements"));
    }

    #[test]
    fn skeleton_indicators_with_thin_text_escalate() {
        let text = "some visible placeholder text here ".repeat(8);
        let html = format!(
            r#"<html><body>
            <div class="skeleton">{text}</div>
            <div class="spinner">loading</div>
            <div class="shimmer">x</div>
            <p>a</p><p>b</p><p>c</p><p>d</p>
            <a href="/x">link</a>{}
            </body></html>"#,
            "<i></i>".repeat(120)
        );
        let verdict = classifier().classify(Some(&html), 200);
        assert!(verdict.escalate, "reason: {}", verdict.reason);
        assert!(verdict.reason.contains("skeleton indicators"));
    }

    #[test]
    fn div_heavy_thin_page_escalates() {
        // >20 divs, each with a little text so the earlier gates pass but
        // total text stays under 3x min_text_length.
        let divs: String = (0..30)
            .map(|i| format!("<div>block {i} text here</div>"))
            .collect();
        let html = format!(
            "<html><body>{divs}<img src=\"a.png\"><a href=\"/b\">b</a>{}</body></html>",
            "<u></u>".repeat(100)
        );
        let verdict = classifier().classify(Some(&html), 200);
        assert!(verdict.escalate, "reason: {}", verdict.reason);
        assert!(verdict.reason.contains("layout-heavy"));
    }

    #[test]
    fn ratio_check_skipped_for_large_pages() {
        // A markup-heavy page past 50 KB with enough text and elements must
        // stay valid; the ratio rule does not apply at that size.
        let text = "real words ".repeat(30);
        let html = format!(
            "<html><body><p>{text}</p><p>{text}</p><p>{text}</p><p>{text}</p><p>{text}</p>{}</body></html>",
            "<b></b>".repeat(8000)
        );
        assert!(html.len() >= 50_000);
        let verdict = classifier().classify(Some(&html), 200);
        assert!(!verdict.escalate, "reason: {}", verdict.reason);
    }

    #[test]
    fn custom_thresholds_are_honored() {
        let strict = Classifier::new(ClassifierConfig {
            min_content_length: 10,
            min_text_length: 5,
            min_meaningful_elements: 1,
            text_to_markup_ratio: 0.001,
        });
        let html = "<html><body><p>short but fine</p></body></html>";
        assert!(!strict.classify(Some(html), 200).escalate);
    }
}
