use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

/// Upper bound on one retry backoff (capped backoff plus jitter).
const RETRY_BACKOFF_ALLOWANCE: Duration = Duration::from_secs(3);
const LEASE_HEADROOM: Duration = Duration::from_secs(30);

const DEFAULT_SHEET_BASE_URL: &str = "https://docs.google.com/spreadsheets/d/e/2PACX-1vRyOdR5ZzocTVLi02rPVQPVwoGyuPrGmULHznFB66pDnqsWrCWVTi5JM5KCbBn8oMVLa-vwIS3RvK6z/pub";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongo_uri: String,
    pub mongo_database: String,
    /// Enables the cross-process cycle lease when set.
    pub redis_uri: Option<String>,
    pub http_port: u16,
    pub quiz: QuizSettings,
}

/// Settings for quiz ingestion and registry reconciliation.
///
/// Every field has a default so a deployment only lists what it overrides,
/// e.g. `[quiz] reset_day_of_year = 214` in `config/prod.toml` or
/// `APP__QUIZ__SYNC_INTERVAL_SECS=120` in the environment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QuizSettings {
    /// Published spreadsheet endpoint; the quiz id goes into the `gid` query parameter.
    pub sheet_base_url: String,
    /// Quiz name -> spreadsheet gid.
    pub quizzes: BTreeMap<String, String>,
    /// Leading student-id digit -> undergraduate school domain.
    pub undergrad_domains: BTreeMap<String, String>,
    /// Leading student-id digit -> graduate school domain.
    pub grad_domains: BTreeMap<String, String>,
    /// Day of year on which the credential validity window rolls over to Aug 1 of the current year.
    pub reset_day_of_year: u32,
    pub sync_interval_secs: u64,
    pub fetch_timeout_secs: u64,
    pub fetch_attempts: usize,
    /// When set, an id-only match also accepts e-mails whose normalized
    /// Levenshtein similarity is strictly above this ratio.
    pub email_similarity_threshold: Option<f64>,
    /// Submissions with these e-mail domains keep ids outside the 8-digit range.
    pub repair_exempt_domains: Vec<String>,
    pub lease_ttl_secs: u64,
}

impl Default for QuizSettings {
    fn default() -> Self {
        let quizzes = [
            ("General", "66546920"),
            ("Laser3D", "1524924728"),
            ("SprayPaint", "1841312496"),
            ("Composite", "913890505"),
            ("Welding", "482685426"),
            ("Studio", "2079405017"),
            ("Waterjet", "2100779718"),
            ("Loom", "1235553349"),
        ];
        let undergrad = [
            ("1", "mymail.pomona.edu"),
            ("2", "scrippscollege.edu"),
            ("3", "cmc.edu"),
            ("4", "g.hmc.edu"),
            ("5", "students.pitzer.edu"),
        ];

        Self {
            sheet_base_url: DEFAULT_SHEET_BASE_URL.to_string(),
            quizzes: to_map(&quizzes),
            undergrad_domains: to_map(&undergrad),
            grad_domains: to_map(&[("2", "cgu.edu")]),
            reset_day_of_year: 213,
            sync_interval_secs: 60,
            fetch_timeout_secs: 20,
            fetch_attempts: 3,
            email_similarity_threshold: None,
            repair_exempt_domains: vec!["cgu.edu".to_string(), "kgi.edu".to_string()],
            lease_ttl_secs: 300,
        }
    }
}

impl QuizSettings {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }

    /// Longest a single quiz fetch can take: every attempt timing out, plus
    /// the backoff between attempts.
    pub fn worst_case_fetch(&self) -> Duration {
        let attempts = self.fetch_attempts.max(1) as u32;
        self.fetch_timeout() * attempts + RETRY_BACKOFF_ALLOWANCE * (attempts - 1)
    }

    /// Lease TTL, raised when the configured value could lapse while one
    /// quiz is still being fetched. The lease is renewed between steps.
    pub fn lease_ttl(&self) -> Duration {
        let floor = self.worst_case_fetch() * 2 + LEASE_HEADROOM;
        Duration::from_secs(self.lease_ttl_secs).max(floor)
    }
}

fn to_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first (two levels up), then the local one
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/*.toml + ENV overrides (prefix: APP_)
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or_else(|_| "make".to_string());

        let redis_uri = settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
            .ok()
            .filter(|uri| !uri.is_empty());

        let http_port = match settings.get::<u16>("server.port") {
            Ok(port) => port,
            Err(config::ConfigError::NotFound(_)) => env::var("HTTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8081),
            Err(err) => return Err(err),
        };

        let quiz = match settings.get::<QuizSettings>("quiz") {
            Ok(quiz) => quiz,
            Err(config::ConfigError::NotFound(_)) => QuizSettings::default(),
            Err(err) => return Err(err),
        };

        Ok(Config {
            mongo_uri,
            mongo_database,
            redis_uri,
            http_port,
            quiz,
        })
    }
}
