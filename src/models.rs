use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccountColor {
    #[default]
    Blue,
    Green,
    Orange,
    Purple,
    Red,
    Teal,
}

impl AccountColor {
    pub fn as_label(self) -> &'static str {
        match self {
            AccountColor::Blue => "blue",
            AccountColor::Green => "green",
            AccountColor::Orange => "orange",
            AccountColor::Purple => "purple",
            AccountColor::Red => "red",
            AccountColor::Teal => "teal",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "blue" => Some(AccountColor::Blue),
            "green" => Some(AccountColor::Green),
            "orange" => Some(AccountColor::Orange),
            "purple" => Some(AccountColor::Purple),
            "red" => Some(AccountColor::Red),
            "teal" => Some(AccountColor::Teal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub account_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_name: Option<String>,
    pub region: String,
    #[serde(default)]
    pub color: AccountColor,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Account {
    pub fn new(name: impl Into<String>, account_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            account_id: account_id.into(),
            profile_name: None,
            region: region.into(),
            color: AccountColor::default(),
            is_enabled: true,
        }
    }

    pub fn with_profile(mut self, profile: Option<String>) -> Self {
        self.profile_name = profile.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn with_color(mut self, color: AccountColor) -> Self {
        self.color = color;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceCost {
    pub service_name: String,
    pub cost: f64,
    pub percentage: f64,
}

impl ServiceCost {
    /// Service name without the vendor prefix, e.g. "Elastic Compute Cloud - Compute".
    pub fn short_name(&self) -> &str {
        self.service_name
            .strip_prefix("Amazon ")
            .or_else(|| self.service_name.strip_prefix("AWS "))
            .unwrap_or(&self.service_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyCost {
    pub date: NaiveDate,
    pub cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonthlyCost {
    /// Calendar month as `YYYY-MM`.
    pub month: String,
    pub cost: f64,
    pub is_complete: bool,
}

impl MonthlyCost {
    /// Abbreviated month name ("Mar"); falls back to the raw month string.
    pub fn short_display(&self) -> String {
        NaiveDate::parse_from_str(&format!("{}-01", self.month), "%Y-%m-%d")
            .map(|d| d.format("%b").to_string())
            .unwrap_or_else(|_| self.month.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BillingSnapshot {
    pub account_id: String,
    pub account_name: String,
    pub month_to_date_cost: f64,
    pub last_month_cost: f64,
    pub forecasted_month_cost: Option<f64>,
    pub daily_average: f64,
    pub cost_by_service: Vec<ServiceCost>,
    pub daily_costs: Vec<DailyCost>,
    pub monthly_costs: Vec<MonthlyCost>,
    pub fetched_at: DateTime<Utc>,
    pub currency: String,
}

impl BillingSnapshot {
    pub fn month_over_month_change(&self) -> Option<f64> {
        month_over_month_change(self.month_to_date_cost, self.last_month_cost)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedBilling {
    pub total_month_to_date: f64,
    pub total_last_month: f64,
    pub total_forecast: Option<f64>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl AggregatedBilling {
    pub fn from_snapshots<'a, I>(snapshots: I) -> Self
    where
        I: IntoIterator<Item = &'a BillingSnapshot>,
    {
        let mut agg = AggregatedBilling {
            total_month_to_date: 0.0,
            total_last_month: 0.0,
            total_forecast: None,
            last_updated: None,
        };

        for snap in snapshots {
            agg.total_month_to_date += snap.month_to_date_cost;
            agg.total_last_month += snap.last_month_cost;
            if let Some(forecast) = snap.forecasted_month_cost {
                agg.total_forecast = Some(agg.total_forecast.unwrap_or(0.0) + forecast);
            }
            match agg.last_updated {
                Some(ts) if ts >= snap.fetched_at => {}
                _ => agg.last_updated = Some(snap.fetched_at),
            }
        }

        agg
    }

    pub fn month_over_month_change(&self) -> Option<f64> {
        month_over_month_change(self.total_month_to_date, self.total_last_month)
    }
}

pub fn month_over_month_change(month_to_date: f64, last_month: f64) -> Option<f64> {
    if last_month <= 0.0 {
        return None;
    }
    Some((month_to_date - last_month) / last_month * 100.0)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum RefreshInterval {
    #[serde(rename = "manual")]
    Manual,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[default]
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "24h")]
    Daily,
}

impl RefreshInterval {
    pub fn as_label(self) -> &'static str {
        match self {
            RefreshInterval::Manual => "manual",
            RefreshInterval::FifteenMinutes => "15m",
            RefreshInterval::ThirtyMinutes => "30m",
            RefreshInterval::OneHour => "1h",
            RefreshInterval::SixHours => "6h",
            RefreshInterval::Daily => "24h",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim() {
            "manual" => Some(RefreshInterval::Manual),
            "15m" => Some(RefreshInterval::FifteenMinutes),
            "30m" => Some(RefreshInterval::ThirtyMinutes),
            "1h" => Some(RefreshInterval::OneHour),
            "6h" => Some(RefreshInterval::SixHours),
            "24h" => Some(RefreshInterval::Daily),
            _ => None,
        }
    }

    /// `None` for manual refresh.
    pub fn as_duration(self) -> Option<Duration> {
        let minutes = match self {
            RefreshInterval::Manual => return None,
            RefreshInterval::FifteenMinutes => 15,
            RefreshInterval::ThirtyMinutes => 30,
            RefreshInterval::OneHour => 60,
            RefreshInterval::SixHours => 6 * 60,
            RefreshInterval::Daily => 24 * 60,
        };
        Some(Duration::from_secs(minutes * 60))
    }
}
