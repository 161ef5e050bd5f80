//! Block/challenge signature detection for scraped pages.
//!
//! Classifies a navigation outcome by matching the final URL and the
//! entity-decoded page body (plus its `<title>`) against known anti-bot
//! signatures. Detection only classifies; reacting (session rotation, proxy
//! rotation, clearance waits) is the caller's job.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use scraper::{Html, Selector};
use url::Url;

pub mod cloudflare;

pub use cloudflare::CloudflareHandler;

/// Challenge categories the ingestion jobs react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChallengeKind {
    Cloudflare,
    Recaptcha,
    Hcaptcha,
    UnusualTraffic,
    RateLimited,
    AccessDenied,
    GenericCaptcha,
}

impl ChallengeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChallengeKind::Cloudflare => "cloudflare_challenge",
            ChallengeKind::Recaptcha => "recaptcha",
            ChallengeKind::Hcaptcha => "hcaptcha",
            ChallengeKind::UnusualTraffic => "unusual_traffic",
            ChallengeKind::RateLimited => "rate_limited",
            ChallengeKind::AccessDenied => "access_denied",
            ChallengeKind::GenericCaptcha => "captcha",
        }
    }
}

impl std::fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A positive detection with the indicator that fired.
#[derive(Debug, Clone)]
pub struct ChallengeSignal {
    pub kind: ChallengeKind,
    pub matched: String,
}

struct ChallengeSignature {
    kind: ChallengeKind,
    url_patterns: Vec<Regex>,
    content_patterns: Vec<Regex>,
}

impl ChallengeSignature {
    fn new(kind: ChallengeKind, url_patterns: &[&str], content_patterns: &[&str]) -> Self {
        Self {
            kind,
            url_patterns: url_patterns.iter().map(|p| build_regex(p)).collect(),
            content_patterns: content_patterns.iter().map(|p| build_regex(p)).collect(),
        }
    }
}

/// Ordered by specificity: the first signature to fire wins.
static SIGNATURES: Lazy<Vec<ChallengeSignature>> = Lazy::new(|| {
    vec![
        ChallengeSignature::new(
            ChallengeKind::Cloudflare,
            &[r"/cdn-cgi/challenge-platform", r"__cf_chl"],
            &[
                r"<title>\s*Just a moment\.\.\.\s*</title>",
                r"cf-browser-verification",
                r"window\._cf_chl_opt\s*=",
                r"Checking your browser before accessing",
                r"<title>\s*Attention Required!\s*\|\s*Cloudflare\s*</title>",
            ],
        ),
        ChallengeSignature::new(
            ChallengeKind::Recaptcha,
            &[r"google\.com/recaptcha"],
            &[
                r"www\.google\.com/recaptcha/api\.js",
                r#"class="g-recaptcha""#,
                r"grecaptcha\.render",
            ],
        ),
        ChallengeSignature::new(
            ChallengeKind::Hcaptcha,
            &[r"hcaptcha\.com"],
            &[
                r"hcaptcha\.com/1/api\.js",
                r#"class="h-captcha""#,
                r"data-hcaptcha-widget-id",
            ],
        ),
        ChallengeSignature::new(
            ChallengeKind::UnusualTraffic,
            &[r"/sorry/"],
            &[
                r"unusual traffic from your (computer|network)",
                r"automated queries",
            ],
        ),
        ChallengeSignature::new(
            ChallengeKind::RateLimited,
            &[],
            &[
                r"You are being rate limited",
                r"<title>\s*Rate Limited\s*</title>",
                r"too many requests",
            ],
        ),
        ChallengeSignature::new(
            ChallengeKind::AccessDenied,
            &[r"/access-denied"],
            &[
                r"<title>[^<]*Access denied[^<]*</title>",
                r"access denied",
                r"403 forbidden",
                r"<title>\s*403\s*</title>",
                r"has banned your access",
            ],
        ),
        // Generic last: any inline captcha mention that slipped past the
        // vendor-specific signatures.
        ChallengeSignature::new(
            ChallengeKind::GenericCaptcha,
            &[r"captcha"],
            &[r"captcha", r"verify you are (a )?human"],
        ),
    ]
});

/// Classify the current navigation state, if it looks like a block page.
pub fn detect_challenge(url: &Url, body: &str) -> Option<ChallengeSignal> {
    let decoded = html_escape::decode_html_entities(body);
    let title = page_title(&decoded);
    let url_str = url.as_str();

    for signature in SIGNATURES.iter() {
        for pattern in &signature.url_patterns {
            if pattern.is_match(url_str) {
                return Some(ChallengeSignal {
                    kind: signature.kind,
                    matched: format!("url:{}", pattern.as_str()),
                });
            }
        }
        for pattern in &signature.content_patterns {
            if pattern.is_match(&decoded)
                || title.as_deref().is_some_and(|t| pattern.is_match(t))
            {
                return Some(ChallengeSignal {
                    kind: signature.kind,
                    matched: format!("content:{}", pattern.as_str()),
                });
            }
        }
    }

    None
}

/// Extract the text of the first `<title>` element.
fn page_title(body: &str) -> Option<String> {
    static TITLE: Lazy<Selector> =
        Lazy::new(|| Selector::parse("title").expect("title selector"));
    let document = Html::parse_document(body);
    document
        .select(&TITLE)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|text| !text.is_empty())
}

fn build_regex(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .multi_line(true)
        .dot_matches_new_line(true)
        .build()
        .unwrap_or_else(|err| panic!("invalid challenge signature `{pattern}`: {err}"))
}
