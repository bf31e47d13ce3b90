//! Resolving DOIs to the landing page they redirect to.
//!
//! Resolution is best effort: any failure leaves the entry without a
//! `resolved_doi_url` and the batch carries on.

use std::time::Duration;

use log::{debug, info, warn};
use rayon::prelude::*;
use reqwest::blocking::Client;
use reqwest::redirect::Policy;
use reqwest::Url;

use crate::errors::{Error, ResolutionError};
use crate::types::BibEntry;

/// More than one retry would let a single bad DOI stall a batch.
pub const MAX_RETRIES: u8 = 1;

const DOI_PREFIXES: [&str; 5] = [
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
    "doi:",
];

#[derive(Clone, Debug)]
pub struct ResolverConfig {
    /// resolver the DOI is appended to, e.g. “https://doi.org/”
    pub base_url: String,
    /// ceiling for one request including all redirects
    pub timeout: Duration,
    /// additional attempts after a timeout or transport error, at most `MAX_RETRIES`
    pub retries: u8,
    pub max_redirects: usize,
    /// number of simultaneous requests during `enrich`
    pub concurrency: usize,
    /// honour the proxy environment variables of the HTTP client
    pub system_proxy: bool,
    /// also store the resolved URL as `url` field if the entry has none
    pub fill_missing_url: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            base_url: "https://doi.org/".to_string(),
            timeout: Duration::from_secs(10),
            retries: 0,
            max_redirects: 10,
            concurrency: 4,
            system_proxy: true,
            fill_missing_url: false,
        }
    }
}

/// Anything that can turn a DOI into a URL.
pub trait Resolve: Sync {
    fn resolve(&self, doi: &str) -> Result<String, ResolutionError>;
}

/// Strip the usual DOI prefixes and check the `10.<registrant>/<suffix>` shape.
pub fn normalize_doi(doi: &str) -> Result<String, ResolutionError> {
    let trimmed = doi.trim();
    let mut bare = trimmed;
    for prefix in DOI_PREFIXES.iter() {
        let head = bare.get(..prefix.len());
        if head.map_or(false, |head| head.eq_ignore_ascii_case(prefix)) {
            bare = bare[prefix.len()..].trim_start();
            break;
        }
    }

    let valid = match bare.split_once('/') {
        Some((registrant, suffix)) => {
            registrant.starts_with("10.")
                && registrant.len() > 3
                && !suffix.is_empty()
                && !bare.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(ResolutionError::InvalidDoi(trimmed.to_string()));
    }
    Ok(bare.replace('#', "%23").replace('?', "%3F"))
}

/// Resolves DOIs by following the redirects of a `HEAD` request.
pub struct DoiResolver {
    client: Client,
    config: ResolverConfig,
}

impl DoiResolver {
    pub fn new(mut config: ResolverConfig) -> Result<DoiResolver, Error> {
        if config.timeout.is_zero() {
            return Err(Error::Config("DOI timeout must be greater than zero".to_string()));
        }
        if config.concurrency == 0 {
            return Err(Error::Config("DOI concurrency must be at least 1".to_string()));
        }
        if Url::parse(&config.base_url).is_err() {
            return Err(Error::Config(format!("invalid DOI resolver URL '{}'", config.base_url)));
        }
        if config.retries > MAX_RETRIES {
            warn!("capping DOI retries from {} to {}", config.retries, MAX_RETRIES);
            config.retries = MAX_RETRIES;
        }
        if !config.base_url.ends_with('/') {
            config.base_url.push('/');
        }

        let mut builder = Client::builder()
            .timeout(config.timeout)
            .redirect(Policy::limited(config.max_redirects))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")));
        if !config.system_proxy {
            builder = builder.no_proxy();
        }
        let client = builder.build()?;
        Ok(DoiResolver { client, config })
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve the DOI of every entry with this resolver's concurrency.
    pub fn enrich(&self, entries: &mut [BibEntry]) -> Result<EnrichmentSummary, Error> {
        enrich(self, entries, self.config.concurrency, self.config.fill_missing_url)
    }

    fn request(&self, doi: &str, target: &Url) -> Result<String, ResolutionError> {
        let response = self
            .client
            .head(target.clone())
            .send()
            .map_err(|source| ResolutionError::from_reqwest(doi, source))?;
        let status = response.status();
        if response.url() != target {
            if !status.is_success() {
                debug!("landing page of DOI {} answered with {}", doi, status);
            }
            return Ok(response.url().to_string());
        }
        if status.is_success() {
            Err(ResolutionError::NoRedirect(doi.to_string()))
        } else {
            Err(ResolutionError::Status {
                doi: doi.to_string(),
                status: status.as_u16(),
            })
        }
    }
}

impl Resolve for DoiResolver {
    fn resolve(&self, doi: &str) -> Result<String, ResolutionError> {
        let doi = normalize_doi(doi)?;
        let target = Url::parse(&format!("{}{}", self.config.base_url, doi))
            .map_err(|_| ResolutionError::InvalidDoi(doi.clone()))?;

        let mut attempt = 0;
        loop {
            match self.request(&doi, &target) {
                Err(err) if err.is_transient() && attempt < self.config.retries => {
                    attempt += 1;
                    debug!("retrying DOI {} after: {}", doi, err);
                }
                result => return result,
            }
        }
    }
}

/// Counts of one enrichment pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EnrichmentSummary {
    pub resolved: usize,
    pub failed: usize,
    pub without_doi: usize,
}

enum Outcome {
    Resolved,
    Failed,
    WithoutDoi,
}

/// Set `resolved_doi_url` on every entry whose DOI resolves, using a
/// dedicated pool of `concurrency` worker threads. Failures are logged and
/// leave the entry untouched.
pub fn enrich<R: Resolve + ?Sized>(
    resolver: &R,
    entries: &mut [BibEntry],
    concurrency: usize,
    fill_missing_url: bool,
) -> Result<EnrichmentSummary, Error> {
    info!("resolving DOIs of {} entries", entries.len());
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(concurrency.max(1))
        .build()?;

    let outcomes: Vec<Outcome> = pool.install(|| {
        entries
            .par_iter_mut()
            .map(|entry| {
                let doi = match entry.doi() {
                    Some(doi) => doi.to_string(),
                    None => {
                        debug!("no DOI in entry {}", entry.citation_key);
                        return Outcome::WithoutDoi;
                    }
                };
                match resolver.resolve(&doi) {
                    Ok(url) => {
                        if fill_missing_url && entry.get("url").is_none() {
                            entry.fields.insert("url".to_string(), url.clone());
                        }
                        entry.resolved_doi_url = Some(url);
                        Outcome::Resolved
                    }
                    Err(err) => {
                        warn!("entry {}: {}", entry.citation_key, err);
                        Outcome::Failed
                    }
                }
            })
            .collect()
    });

    let mut summary = EnrichmentSummary::default();
    for outcome in outcomes {
        match outcome {
            Outcome::Resolved => summary.resolved += 1,
            Outcome::Failed => summary.failed += 1,
            Outcome::WithoutDoi => summary.without_doi += 1,
        }
    }
    info!(
        "{} DOIs resolved, {} failed, {} entries without DOI",
        summary.resolved, summary.failed, summary.without_doi
    );
    Ok(summary)
}
