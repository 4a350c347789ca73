//! # Forecasting
//!
//! Guessing how much surplus a donor will have on a given day.
//!
//! ## Models
//! - Mock: average of the donor's past offers in the category, a weekend bump, and noise.
//!   Confidence is noise too.
//! - Remote: POST the same inputs to an external model server and trust its answer within reason.
//!
//! Nothing here is smarter than that, the point is the record it produces.
//!
//! ## Flow
//! 1. [`request_for`] reads the donor's history out of the ledger
//! 2. [`Forecaster::forecast`] runs the model, no ledger access needed, so the server does this
//!    without holding the ledger lock
//! 3. [`record`] writes the result back as a `predicted` listing
//!
//! [`forecast_for`] glues the three together for callers that own the ledger outright.
use std::{path::Path, sync::Mutex, time::Duration};

use bank::{
    Ledger, LedgerError,
    models::{Category, NewPrediction, Prediction, PredictionModel},
};
use chrono::{DateTime, Days, NaiveDate, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use rand::{Rng, SeedableRng, rngs::StdRng};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, warn};

pub mod models;
pub mod utils;

use models::{Forecast, ForecastRequest, PREDICT_PATH, RemoteForecast};
use utils::{base_quantity, history, round2, weekday_multiplier};

pub const REMOTE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("Model server unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),

    #[error("Model server answered {0}")]
    Status(u16),

    #[error("Model server sent an unusable forecast: {0}")]
    Malformed(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

pub struct MockPredictor {
    rng: Mutex<StdRng>,
}

impl MockPredictor {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
        }
    }

    pub async fn forecast(&self, request: &ForecastRequest) -> Forecast {
        let base = base_quantity(&request.history) * weekday_multiplier(request.date);

        let (noise, confidence) = {
            // a poisoned rng is still a usable rng
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            (rng.gen_range(0.7..1.3), rng.gen_range(0.55..0.95))
        };

        Forecast {
            quantity: ((base * noise).round() as u32).max(1),
            confidence: round2(confidence),
            model: PredictionModel::Mock,
        }
    }
}

impl Default for MockPredictor {
    fn default() -> Self {
        Self::new()
    }
}

pub struct RemoteModel {
    client: Client,
    endpoint: String,
}

impl RemoteModel {
    pub fn new(endpoint: &str) -> Result<Self, ForecastError> {
        let client = Client::builder().timeout(REMOTE_TIMEOUT).build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub async fn forecast(&self, request: &ForecastRequest) -> Result<Forecast, ForecastError> {
        let url = format!("{}{PREDICT_PATH}", self.endpoint);
        let res = self.client.post(&url).json(request).send().await?;

        #[cfg(feature = "verbose")]
        debug!("Model server status: {}", res.status());

        if !res.status().is_success() {
            warn!("Model server at {url} answered {}", res.status());
            return Err(ForecastError::Status(res.status().as_u16()));
        }

        let body = res.text().await?;
        let remote: RemoteForecast =
            serde_json::from_str(&body).map_err(|e| ForecastError::Malformed(e.to_string()))?;

        let quantity = remote.predicted_quantity;
        if !quantity.is_finite() || quantity < 1.0 || quantity.round() > f64::from(u32::MAX) {
            return Err(ForecastError::Malformed(format!("quantity {quantity}")));
        }

        if remote.confidence.is_nan() {
            return Err(ForecastError::Malformed("confidence is NaN".into()));
        }

        Ok(Forecast {
            quantity: quantity.round() as u32,
            confidence: round2(remote.confidence.clamp(0.0, 1.0)),
            model: PredictionModel::Remote,
        })
    }
}

pub enum Forecaster {
    Mock(MockPredictor),
    Remote(RemoteModel),
}

impl Forecaster {
    /// Remote model when an endpoint is configured, mock otherwise.
    pub fn from_endpoint(endpoint: Option<&str>) -> Result<Self, ForecastError> {
        match endpoint {
            Some(endpoint) => Ok(Forecaster::Remote(RemoteModel::new(endpoint)?)),
            None => Ok(Forecaster::Mock(MockPredictor::new())),
        }
    }

    pub async fn forecast(&self, request: &ForecastRequest) -> Result<Forecast, ForecastError> {
        match self {
            Forecaster::Mock(mock) => Ok(mock.forecast(request).await),
            Forecaster::Remote(remote) => remote.forecast(request).await,
        }
    }
}

pub fn request_for(
    ledger: &Ledger,
    donor_id: &str,
    category: Category,
    date: NaiveDate,
) -> ForecastRequest {
    ForecastRequest {
        donor_id: donor_id.to_string(),
        category,
        date,
        history: history(ledger, donor_id, category),
    }
}

pub fn record(
    ledger: &mut Ledger,
    request: &ForecastRequest,
    forecast: Forecast,
    now: DateTime<Utc>,
) -> Result<Prediction, LedgerError> {
    ledger.create_prediction(
        &request.donor_id,
        NewPrediction {
            category: request.category,
            quantity: forecast.quantity,
            confidence: forecast.confidence,
            for_date: request.date,
            model: forecast.model,
        },
        now,
    )
}

pub async fn forecast_for(
    ledger: &mut Ledger,
    forecaster: &Forecaster,
    donor_id: &str,
    category: Category,
    date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<Prediction, ForecastError> {
    let request = request_for(ledger, donor_id, category, date);
    let forecast = forecaster.forecast(&request).await?;

    debug!("Forecast {} for {date}: {:?}", donor_id, forecast);
    Ok(record(ledger, &request, forecast, now)?)
}

/// One prediction per day starting today. `on_day` sees each prediction as it lands.
pub async fn forecast_range(
    ledger: &mut Ledger,
    forecaster: &Forecaster,
    donor_id: &str,
    category: Category,
    days: u32,
    now: DateTime<Utc>,
    mut on_day: impl FnMut(&Prediction),
) -> Result<Vec<Prediction>, ForecastError> {
    let today = now.date_naive();
    let mut predictions = Vec::with_capacity(days as usize);

    for offset in 0..days {
        let date = today
            .checked_add_days(Days::new(u64::from(offset)))
            .ok_or_else(|| LedgerError::InvalidInput("date out of range".into()))?;

        let prediction = forecast_for(ledger, forecaster, donor_id, category, date, now).await?;
        on_day(&prediction);
        predictions.push(prediction);
    }

    Ok(predictions)
}

/// Batch job behind the `forecast` binary: fill a ledger file with a donor's upcoming predictions.
pub async fn load_forecasts(
    path: &Path,
    donor_email: &str,
    days: u32,
    category: Category,
    forecaster: &Forecaster,
) -> anyhow::Result<()> {
    let mut ledger = bank::get_ledger(path)?;
    let donor_id = ledger
        .users()
        .find(|user| user.email == donor_email.trim().to_lowercase())
        .map(|user| user.id.clone())
        .ok_or_else(|| anyhow::anyhow!("No account for {donor_email}"))?;

    println!("Loaded Offers: {}", ledger.offers(&Default::default()).len());
    println!("Loaded Predictions: {}\n", ledger.predictions(&Default::default()).len());

    let pb = ProgressBar::new(u64::from(days));
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )?
        .progress_chars("=> "),
    );

    let predictions = forecast_range(
        &mut ledger,
        forecaster,
        &donor_id,
        category,
        days,
        Utc::now(),
        |prediction| {
            pb.set_message(format!("Forecast {}", prediction.for_date));
            pb.inc(1);
        },
    )
    .await?;

    pb.finish_with_message("Done");

    let total: u64 = predictions.iter().map(|p| u64::from(p.quantity)).sum();
    println!("New Predictions: {}", predictions.len());
    println!("Forecast Quantity: {total}");

    bank::write_ledger(path, &ledger)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use bank::{
        Ledger,
        lifecycle::DonationStatus,
        models::{Category, NewUser, PredictionModel, Role},
    };
    use chrono::{NaiveDate, TimeZone, Utc};
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    use super::{
        ForecastError, Forecaster, MockPredictor, RemoteModel, forecast_range, models::ForecastRequest,
    };

    fn request(history: Vec<u32>) -> ForecastRequest {
        ForecastRequest {
            donor_id: "donor".into(),
            category: Category::Bakery,
            // Monday
            date: NaiveDate::from_ymd_opt(2025, 11, 17).unwrap(),
            history,
        }
    }

    #[tokio::test]
    async fn mock_stays_in_band() {
        let mock = MockPredictor::seeded(7);

        for _ in 0..50 {
            let forecast = mock.forecast(&request(vec![20, 20])).await;

            assert!((14..=26).contains(&forecast.quantity), "{}", forecast.quantity);
            assert!((0.55..=0.95).contains(&forecast.confidence));
            assert_eq!(forecast.model, PredictionModel::Mock);
        }
    }

    #[tokio::test]
    async fn mock_is_reproducible_with_seed() {
        let a = MockPredictor::seeded(42).forecast(&request(vec![])).await;
        let b = MockPredictor::seeded(42).forecast(&request(vec![])).await;

        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn remote_model_parses_answer() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/predict"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "predicted_quantity": 17.4, "confidence": 1.7 })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let model = RemoteModel::new(&format!("{}/", server.uri())).unwrap();
        let forecast = model.forecast(&request(vec![1, 2, 3])).await.unwrap();

        assert_eq!(forecast.quantity, 17);
        assert_eq!(forecast.confidence, 1.0);
        assert_eq!(forecast.model, PredictionModel::Remote);
    }

    #[tokio::test]
    async fn remote_model_errors_surface() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/predict"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let model = RemoteModel::new(&server.uri()).unwrap();
        let err = model.forecast(&request(vec![])).await.unwrap_err();

        assert!(matches!(err, ForecastError::Status(503)));
    }

    #[tokio::test]
    async fn remote_model_rejects_empty_forecast() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/predict"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "quantity": 0.2 })))
            .mount(&server)
            .await;

        let model = RemoteModel::new(&server.uri()).unwrap();
        let err = model.forecast(&request(vec![])).await.unwrap_err();

        assert!(matches!(err, ForecastError::Malformed(_)));
    }

    async fn remote_answer(quantity: f64) -> Result<super::models::Forecast, ForecastError> {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/predict"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "predicted_quantity": quantity, "confidence": 0.8 })),
            )
            .mount(&server)
            .await;

        RemoteModel::new(&server.uri()).unwrap().forecast(&request(vec![])).await
    }

    #[tokio::test]
    async fn remote_model_rejects_fractional_forecast_below_one() {
        let err = remote_answer(0.6).await.unwrap_err();
        assert!(matches!(err, ForecastError::Malformed(_)));

        assert_eq!(remote_answer(1.0).await.unwrap().quantity, 1);
    }

    #[tokio::test]
    async fn remote_model_rejects_oversized_forecast() {
        let err = remote_answer(1e12).await.unwrap_err();
        assert!(matches!(err, ForecastError::Malformed(_)));
    }

    #[tokio::test]
    async fn range_writes_one_prediction_per_day() {
        let now = Utc.with_ymd_and_hms(2025, 11, 14, 9, 0, 0).unwrap();
        let mut ledger = Ledger::new();
        let donor = ledger
            .register(
                NewUser {
                    email: "store@example.com".into(),
                    password: "long enough".into(),
                    name: "Corner Store".into(),
                    role: Role::Donor,
                    organization: None,
                    phone: None,
                    location: None,
                },
                now,
            )
            .unwrap();

        let forecaster = Forecaster::Mock(MockPredictor::seeded(1));
        let mut seen = 0;
        let predictions = forecast_range(
            &mut ledger,
            &forecaster,
            &donor.id,
            Category::Produce,
            3,
            now,
            |_| seen += 1,
        )
        .await
        .unwrap();

        assert_eq!(seen, 3);
        let dates: Vec<_> = predictions.iter().map(|p| p.for_date.to_string()).collect();
        assert_eq!(dates, vec!["2025-11-14", "2025-11-15", "2025-11-16"]);
        assert!(predictions.iter().all(|p| p.status == DonationStatus::Predicted));
    }
}
