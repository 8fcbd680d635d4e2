//! `FraudRatedServer`: one host's rating cache entry, its sitecheck request
//! URL, and its XML response parser.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::fraud::advisory::{AdvisoryId, AdvisoryType, Detector, FraudAdvisory};
use crate::traits::CryptoOps;

/// `FraudRatedServer.state`: `start_rating` only succeeds from
/// `Unrated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatedServerState {
    Unrated,
    RatingInProgress,
    Rated,
}

/// The verdict for a single URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FraudVerdict {
    NotRated,
    Phishing,
    Malware,
}

/// What a lookup against a [`FraudRatedServer`] yields for one URL.
#[derive(Debug, Clone)]
pub struct FraudUrlRating {
    pub verdict: FraudVerdict,
    pub display_text: Option<String>,
    pub info_url: Option<String>,
    pub homepage: Option<String>,
    pub logo_url: Option<String>,
    pub server_bypassed: bool,
}

impl FraudUrlRating {
    pub(crate) fn not_rated(server_bypassed: bool) -> Self {
        Self {
            verdict: FraudVerdict::NotRated,
            display_text: None,
            info_url: None,
            homepage: None,
            logo_url: None,
            server_bypassed,
        }
    }
}

/// Per-host rating cache entry: state machine, advisory set, TTL (spec
/// §3, §4.9).
#[derive(Debug)]
pub struct FraudRatedServer {
    hostname: String,
    state: RatedServerState,
    advisories: BTreeMap<AdvisoryId, FraudAdvisory>,
    expire_time: DateTime<Utc>,
    bypassed_by_user: bool,
}

impl FraudRatedServer {
    #[must_use]
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            state: RatedServerState::Unrated,
            advisories: BTreeMap::new(),
            expire_time: DateTime::<Utc>::UNIX_EPOCH,
            bypassed_by_user: false,
        }
    }

    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    #[must_use]
    pub fn state(&self) -> RatedServerState {
        self.state
    }

    #[must_use]
    pub fn bypassed_by_user(&self) -> bool {
        self.bypassed_by_user
    }

    pub fn mark_bypassed(&mut self) {
        self.bypassed_by_user = true;
    }

    /// Expired iff not user-bypassed and the TTL has elapsed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        !self.bypassed_by_user && self.expire_time < Utc::now()
    }

    /// Rated iff `state == Rated` and not expired.
    #[must_use]
    pub fn is_rated(&self) -> bool {
        self.state == RatedServerState::Rated && !self.is_expired()
    }

    /// `Unrated → RatingInProgress`. No-op from any other state (spec
    /// §4.9: "`start_rating` from `UNRATED` only").
    pub fn begin_rating(&mut self) -> bool {
        if self.state != RatedServerState::Unrated {
            return false;
        }
        self.state = RatedServerState::RatingInProgress;
        true
    }

    /// Roll back to `Unrated` after a failed or unparseable response, so a
    /// later grace-period check can retry.
    pub fn mark_rating_failed(&mut self) {
        self.state = RatedServerState::Unrated;
    }

    /// The sitecheck request URL for this server: `hdn` is
    /// `base64(md5(hostname + "-Oscar0308"))`.
    #[must_use]
    pub fn request_url(&self, sitecheck_host: &str, is_secure: bool, crypto: &dyn CryptoOps) -> url::Url {
        let hdn = crypto.md5_base64(format!("{}-Oscar0308", self.hostname).as_bytes());
        let scheme = if is_secure { "https" } else { "http" };
        let mut url = url::Url::parse(&format!("{scheme}://{sitecheck_host}/"))
            .expect("sitecheck host forms a valid base URL");
        url.query_pairs_mut().append_pair("host", &self.hostname).append_pair("hdn", &hdn);
        url
    }

    /// Parse a sitecheck XML response, replacing this server's advisories
    /// and TTL on success and transitioning to `Rated`.
    /// Returns `false` (and rolls the state back to `Unrated`) on a
    /// malformed body.
    pub fn apply_response(&mut self, body: &str) -> bool {
        match parse_sitecheck_xml(body) {
            Some((expire_time, advisories)) => {
                self.expire_time = expire_time;
                self.advisories = advisories;
                self.state = RatedServerState::Rated;
                true
            }
            None => {
                self.mark_rating_failed();
                false
            }
        }
    }

    /// Compute the rating for `url`, trying advisories in ascending id
    /// order; the first matching detector wins.
    #[must_use]
    pub fn get_rating_for_url(&self, url: &str) -> FraudUrlRating {
        for advisory in self.advisories.values() {
            if !advisory.matches(url) {
                continue;
            }
            let verdict = match advisory.advisory_type {
                AdvisoryType::Phishing => FraudVerdict::Phishing,
                AdvisoryType::Malware => FraudVerdict::Malware,
                AdvisoryType::Unknown => continue,
            };
            return FraudUrlRating {
                verdict,
                display_text: Some(advisory.display_text.clone()),
                info_url: Some(advisory.info_url.clone()),
                homepage: Some(advisory.homepage.clone()),
                logo_url: Some(format!("http://{}/img/logo-{}.jpg", self.hostname, advisory.id)),
                server_bypassed: self.bypassed_by_user,
            };
        }
        FraudUrlRating::not_rated(self.bypassed_by_user)
    }
}

fn parse_sitecheck_xml(body: &str) -> Option<(DateTime<Utc>, BTreeMap<AdvisoryId, FraudAdvisory>)> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut expire_time = Utc::now();
    let mut advisories: BTreeMap<AdvisoryId, FraudAdvisory> = BTreeMap::new();
    let mut current_tag: Option<String> = None;
    let mut current_source_id: Option<AdvisoryId> = None;

    loop {
        let event = reader.read_event_into(&mut buf).ok()?;
        match event {
            Event::Start(e) | Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_ascii_lowercase();
                match name.as_str() {
                    "source" => {
                        let mut id = None;
                        let mut kind = None;
                        let mut advisory_url = String::new();
                        let mut homepage = String::new();
                        for attr in e.attributes().flatten() {
                            let key = String::from_utf8_lossy(attr.key.as_ref()).to_ascii_lowercase();
                            let Ok(value) = attr.unescape_value() else { continue };
                            match key.as_str() {
                                "id" => id = value.parse::<AdvisoryId>().ok(),
                                "type" => kind = value.parse::<u8>().ok(),
                                "advisory" => advisory_url = value.to_string(),
                                "homepage" => homepage = value.to_string(),
                                _ => {}
                            }
                        }
                        if let Some(id) = id {
                            advisories.insert(
                                id,
                                FraudAdvisory {
                                    id,
                                    advisory_type: AdvisoryType::from_source_type(kind.unwrap_or(0)),
                                    display_text: String::new(),
                                    info_url: advisory_url,
                                    homepage,
                                    detectors: Vec::new(),
                                },
                            );
                            current_source_id = Some(id);
                        }
                    }
                    "u" | "r" => {
                        current_source_id = e
                            .attributes()
                            .flatten()
                            .find(|a| a.key.as_ref().eq_ignore_ascii_case(b"src"))
                            .and_then(|a| a.unescape_value().ok())
                            .and_then(|v| v.parse::<AdvisoryId>().ok());
                    }
                    _ => {}
                }
                current_tag = Some(name);
            }
            Event::Text(t) => {
                let text = t.unescape().ok()?.trim().to_string();
                match current_tag.as_deref() {
                    Some("ce") => {
                        if let Ok(secs) = text.parse::<i64>() {
                            expire_time = Utc::now() + chrono::Duration::seconds(secs);
                        }
                    }
                    Some("source") => {
                        if let Some(adv) = current_source_id.and_then(|id| advisories.get_mut(&id)) {
                            adv.display_text = text;
                        }
                    }
                    Some("u") => {
                        if let Some(adv) = current_source_id.and_then(|id| advisories.get_mut(&id)) {
                            adv.detectors.push(Detector::HostPrefix(text));
                        }
                    }
                    Some("r") => {
                        if let Some(adv) = current_source_id.and_then(|id| advisories.get_mut(&id)) {
                            adv.detectors.push(Detector::Regex(text));
                        }
                    }
                    _ => {}
                }
            }
            Event::End(_) => {
                current_tag = None;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    // Advisories that ended up with no detectors are pruned.
    advisories.retain(|_, a| !a.detectors.is_empty());
    Some((expire_time, advisories))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::PlaintextCrypto;

    const SAMPLE_XML: &str = r#"
        <response>
            <ce>3600</ce>
            <source id="1" type="1" advisory="http://info.example/1" homepage="http://home.example/1">A phishing site</source>
            <u src="1">http://evil.example/phish</u>
            <source id="2" type="2" advisory="http://info.example/2" homepage="http://home.example/2">A malware site</source>
            <r src="2">http://bad\.example/.*</r>
            <source id="3" type="1" advisory="http://info.example/3" homepage="http://home.example/3">No detectors</source>
        </response>
    "#;

    #[test]
    fn request_url_includes_host_and_hdn() {
        let server = FraudRatedServer::new("evil.example");
        let url = server.request_url("sitecheck2.opera.com", true, &PlaintextCrypto);
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.host_str(), Some("sitecheck2.opera.com"));
        let pairs: Vec<_> = url.query_pairs().collect();
        assert_eq!(pairs[0].0, "host");
        assert_eq!(pairs[0].1, "evil.example");
        assert_eq!(pairs[1].0, "hdn");
    }

    #[test]
    fn begin_rating_only_succeeds_once() {
        let mut server = FraudRatedServer::new("evil.example");
        assert!(server.begin_rating());
        assert!(!server.begin_rating());
    }

    #[test]
    fn apply_response_parses_advisories_and_prunes_empty_ones() {
        let mut server = FraudRatedServer::new("evil.example");
        server.begin_rating();
        assert!(server.apply_response(SAMPLE_XML));
        assert!(server.is_rated());

        let phishing = server.get_rating_for_url("http://evil.example/phish/login");
        assert_eq!(phishing.verdict, FraudVerdict::Phishing);
        assert_eq!(phishing.logo_url.as_deref(), Some("http://evil.example/img/logo-1.jpg"));

        let safe = server.get_rating_for_url("http://totally-safe.example/");
        assert_eq!(safe.verdict, FraudVerdict::NotRated);
    }

    #[test]
    fn apply_response_rejects_garbage() {
        let mut server = FraudRatedServer::new("evil.example");
        server.begin_rating();
        assert!(!server.apply_response("not xml at all <<<"));
        assert_eq!(server.state(), RatedServerState::Unrated);
    }

    #[test]
    fn bypassed_server_never_expires() {
        let mut server = FraudRatedServer::new("evil.example");
        server.mark_bypassed();
        assert!(!server.is_expired());
    }
}
