//! Concurrent weather forecasts.
//!
//! Each prompt runs the forecast agent against its own [`WeatherService`];
//! finished forecasts are saved per user.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use waypoint_agent::{fan_out, Agent, AgentError, Attributed, RunContext, RunOptions, Tool, ToolError};
use waypoint_core::config::{AppConfig, WeatherConfig};
use waypoint_core::error::{Result, WaypointError};
use waypoint_core::traits::LlmClient;

use crate::store::ForecastStore;

const GEOCODE_URL: &str = "https://geocode.maps.co/search";
const FORECAST_URL: &str = "https://api.tomorrow.io/v4/weather/forecast";
const HISTORY_URL: &str = "https://api.tomorrow.io/v4/weather/history/recent";

pub const FORECAST_SYSTEM_PROMPT: &str =
    "Providing a weather forecast at the locations the user provides.";

/// Canned coordinates (London) used without a geocoding key.
pub const DUMMY_LAT_LNG: (f64, f64) = (51.1, -0.1);

/// A temperature and a short description.
#[derive(Debug, Clone, PartialEq)]
pub struct Weather {
    pub temperature: String,
    pub description: String,
}

impl Weather {
    fn dummy() -> Self {
        Self {
            temperature: "21 °C".into(),
            description: "Sunny".into(),
        }
    }
}

/// Text for a tomorrow.io weather code.
pub fn describe_weather_code(code: i64) -> &'static str {
    match code {
        1000 => "Clear, Sunny",
        1100 => "Mostly Clear",
        1101 => "Partly Cloudy",
        1102 => "Mostly Cloudy",
        1001 => "Cloudy",
        2000 => "Fog",
        2100 => "Light Fog",
        4000 => "Drizzle",
        4001 => "Rain",
        4200 => "Light Rain",
        4201 => "Heavy Rain",
        5000 => "Snow",
        5001 => "Flurries",
        5100 => "Light Snow",
        5101 => "Heavy Snow",
        6000 => "Freezing Drizzle",
        6001 => "Freezing Rain",
        6200 => "Light Freezing Rain",
        6201 => "Heavy Freezing Rain",
        7000 => "Ice Pellets",
        7101 => "Heavy Ice Pellets",
        7102 => "Light Ice Pellets",
        8000 => "Thunderstorm",
        _ => "Unknown",
    }
}

/// Geocoding and weather lookups for one forecast run.
///
/// Without API keys every lookup returns canned values and no request is
/// made.
pub struct WeatherService {
    client: reqwest::Client,
    weather_api_key: Option<String>,
    geo_api_key: Option<String>,
}

fn service_err(service: &str, e: impl std::fmt::Display) -> WaypointError {
    WaypointError::Service {
        service: service.to_string(),
        message: e.to_string(),
    }
}

impl WeatherService {
    pub fn new(config: &WeatherConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            weather_api_key: config.weather_api_key.clone(),
            geo_api_key: config.geo_api_key.clone(),
        }
    }

    async fn get_json(&self, service: &str, url: &str, query: &[(&str, String)]) -> Result<Value> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| service_err(service, e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(service_err(service, format!("HTTP {}: {}", status, body)));
        }
        response.json().await.map_err(|e| service_err(service, e))
    }

    /// Coordinates of the first match for `location`, if any.
    pub async fn lat_lng(&self, location: &str) -> Result<Option<(f64, f64)>> {
        let Some(key) = &self.geo_api_key else {
            return Ok(Some(DUMMY_LAT_LNG));
        };

        debug!(location, "Calling geocode API");
        let data = self
            .get_json("geocode", GEOCODE_URL, &[("q", location.to_string()), ("api_key", key.clone())])
            .await?;
        let Some(first) = data.as_array().and_then(|a| a.first()) else {
            return Ok(None);
        };

        let coord = |field: &str| -> Option<f64> {
            match &first[field] {
                Value::String(s) => s.parse().ok(),
                other => other.as_f64(),
            }
        };
        match (coord("lat"), coord("lon")) {
            (Some(lat), Some(lng)) => Ok(Some((lat, lng))),
            _ => Err(service_err("geocode", "response is missing coordinates")),
        }
    }

    async fn daily(&self, url: &str, lat: f64, lng: f64, date: NaiveDate) -> Result<Weather> {
        let Some(key) = &self.weather_api_key else {
            return Ok(Weather::dummy());
        };

        debug!(lat, lng, %date, "Calling weather API");
        let data = self
            .get_json(
                "weather",
                url,
                &[
                    ("location", format!("{}, {}", lat, lng)),
                    ("timesteps", "1d".to_string()),
                    ("units", "metric".to_string()),
                    ("apikey", key.clone()),
                ],
            )
            .await?;

        let days = data["timelines"]["daily"]
            .as_array()
            .ok_or_else(|| service_err("weather", "response has no daily timeline"))?;
        let day = days
            .iter()
            .find(|d| {
                d["time"]
                    .as_str()
                    .is_some_and(|t| t.starts_with(&date.format("%Y-%m-%d").to_string()))
            })
            .or_else(|| days.first())
            .ok_or_else(|| service_err("weather", "daily timeline is empty"))?;

        let values = &day["values"];
        let temperature = values["temperatureAvg"]
            .as_f64()
            .or_else(|| values["temperatureApparentAvg"].as_f64())
            .ok_or_else(|| service_err("weather", "response has no temperature"))?;
        let code = values["weatherCodeMax"].as_i64().unwrap_or_default();

        Ok(Weather {
            temperature: format!("{:.0}°C", temperature),
            description: describe_weather_code(code).to_string(),
        })
    }

    pub async fn get_forecast(&self, lat: f64, lng: f64, date: NaiveDate) -> Result<Weather> {
        self.daily(FORECAST_URL, lat, lng, date).await
    }

    pub async fn get_historic_weather(&self, lat: f64, lng: f64, date: NaiveDate) -> Result<Weather> {
        self.daily(HISTORY_URL, lat, lng, date).await
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ForecastInput {
    /// Place to forecast, as the user described it.
    location: String,
    forecast_date: NaiveDate,
}

/// Forecasts for future dates, recorded weather for past ones.
pub struct WeatherForecastTool;

impl Tool<WeatherService> for WeatherForecastTool {
    fn name(&self) -> &str {
        "weather_forecast"
    }

    fn description(&self) -> &str {
        "Get the weather at a location on a date. Past dates return the recorded weather."
    }

    fn input_schema(&self) -> Value {
        serde_json::to_value(schemars::schema_for!(ForecastInput)).unwrap_or_default()
    }

    fn call<'a>(
        &'a self,
        ctx: RunContext<'a, WeatherService>,
        input: Value,
    ) -> BoxFuture<'a, std::result::Result<Value, ToolError>> {
        Box::pin(async move {
            let input: ForecastInput = serde_json::from_value(input)
                .map_err(|e| ToolError::Retry(format!("Invalid arguments: {}", e)))?;
            let service = ctx.deps;
            let failed = |e: WaypointError| ToolError::Failed(e.to_string());

            let (lat, lng) = service
                .lat_lng(&input.location)
                .await
                .map_err(failed)?
                .ok_or_else(|| ToolError::Retry("Could not find the location".into()))?;

            let text = if input.forecast_date < Utc::now().date_naive() {
                let w = service
                    .get_historic_weather(lat, lng, input.forecast_date)
                    .await
                    .map_err(failed)?;
                format!(
                    "The weather in {} on {} was {}, {}",
                    input.location, input.forecast_date, w.temperature, w.description
                )
            } else {
                let w = service
                    .get_forecast(lat, lng, input.forecast_date)
                    .await
                    .map_err(failed)?;
                format!(
                    "The forecast in {} on {} is {}, {}",
                    input.location, input.forecast_date, w.temperature, w.description
                )
            };
            Ok(Value::String(text))
        })
    }
}

pub fn forecast_agent(llm: Arc<dyn LlmClient>, config: &AppConfig) -> Agent<WeatherService, String> {
    Agent::new(llm, config.model.clone())
        .system_prompt(FORECAST_SYSTEM_PROMPT)
        .tool(WeatherForecastTool)
        .retries(config.limits.output_retries)
}

/// Forecast every `(prompt, user_id)` concurrently and store the results.
///
/// Results come back in input order, keyed by user id. A failed prompt
/// does not stop the others; only successful forecasts are stored.
pub async fn run_weather_forecast(
    agent: &Agent<WeatherService, String>,
    config: &AppConfig,
    prompts: Vec<(String, i64)>,
    store: &ForecastStore,
) -> Vec<Attributed<i64, std::result::Result<String, AgentError>>> {
    let limits = waypoint_agent::UsageLimits::from(&config.limits);
    let items = prompts.into_iter().map(|(prompt, user_id)| (user_id, (prompt, user_id)));

    let results = fan_out(items, |(prompt, user_id): (String, i64)| async move {
        let service = WeatherService::new(&config.weather);
        let options = RunOptions {
            limits,
            ..RunOptions::default()
        };
        let run = agent.run(&prompt, &service, options).await?;
        store.store_forecast(user_id, &run.output)?;
        Ok::<_, AgentError>(run.output)
    })
    .await;

    let failed = results.iter().filter(|r| r.value.is_err()).count();
    if failed > 0 {
        warn!(failed, total = results.len(), "Some forecasts failed");
    }
    info!(total = results.len(), "Forecasts complete");
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use waypoint_agent::Usage;

    #[test]
    fn test_weather_codes() {
        assert_eq!(describe_weather_code(1000), "Clear, Sunny");
        assert_eq!(describe_weather_code(8000), "Thunderstorm");
        assert_eq!(describe_weather_code(42), "Unknown");
    }

    #[tokio::test]
    async fn test_tool_without_keys_uses_canned_weather() {
        let service = WeatherService::new(&WeatherConfig::default());
        let usage = Usage::new();
        let ctx = RunContext {
            deps: &service,
            usage: &usage,
            retry: 0,
            prompt: "weather?",
        };

        let out = WeatherForecastTool
            .call(ctx, json!({"location": "London", "forecast_date": "2999-01-01"}))
            .await
            .unwrap();
        assert_eq!(out, json!("The forecast in London on 2999-01-01 is 21 °C, Sunny"));

        let past = WeatherForecastTool
            .call(ctx, json!({"location": "Paris", "forecast_date": "2000-01-01"}))
            .await
            .unwrap();
        assert_eq!(past, json!("The weather in Paris on 2000-01-01 was 21 °C, Sunny"));
    }

    #[tokio::test]
    async fn test_tool_rejects_bad_arguments() {
        let service = WeatherService::new(&WeatherConfig::default());
        let usage = Usage::new();
        let ctx = RunContext {
            deps: &service,
            usage: &usage,
            retry: 0,
            prompt: "",
        };
        let err = WeatherForecastTool
            .call(ctx, json!({"location": "London"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Retry(_)));
    }
}
