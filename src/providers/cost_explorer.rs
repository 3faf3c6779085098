use crate::credentials::{CredentialCache, Credentials};
use crate::error::AppError;
use crate::models::{Account, BillingSnapshot, DailyCost, MonthlyCost, ServiceCost};
use crate::providers::BillingFetcher;
use crate::signing::{sign, SignableRequest};
use async_trait::async_trait;
use chrono::{Datelike, Months, NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

const SIGNING_SERVICE: &str = "ce";
const TARGET_PREFIX: &str = "AWSInsightsIndexService";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const METRIC: &str = "UnblendedCost";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Date windows for one fetch. End dates are exclusive upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BillingPeriods {
    pub today: NaiveDate,
    pub tomorrow: NaiveDate,
    pub first_of_month: NaiveDate,
    pub first_of_last_month: NaiveDate,
    pub first_of_next_month: NaiveDate,
    pub six_months_ago: NaiveDate,
}

impl BillingPeriods {
    pub fn for_day(today: NaiveDate) -> Result<Self, AppError> {
        let out_of_range = || AppError::Config(format!("date {today} is out of range"));
        let first_of_month = today.with_day(1).ok_or_else(out_of_range)?;
        Ok(Self {
            today,
            tomorrow: today.succ_opt().ok_or_else(out_of_range)?,
            first_of_month,
            first_of_last_month: first_of_month
                .checked_sub_months(Months::new(1))
                .ok_or_else(out_of_range)?,
            first_of_next_month: first_of_month
                .checked_add_months(Months::new(1))
                .ok_or_else(out_of_range)?,
            six_months_ago: first_of_month
                .checked_sub_months(Months::new(5))
                .ok_or_else(out_of_range)?,
        })
    }

    pub fn is_last_day_of_month(&self) -> bool {
        self.tomorrow.month() != self.today.month()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CostAndUsageResponse {
    results_by_time: Vec<ResultByTime>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResultByTime {
    time_period: Option<TimePeriod>,
    #[serde(default)]
    total: HashMap<String, MetricValue>,
    #[serde(default)]
    groups: Vec<Group>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TimePeriod {
    start: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Group {
    #[serde(default)]
    keys: Vec<String>,
    #[serde(default)]
    metrics: HashMap<String, MetricValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MetricValue {
    amount: Option<String>,
    unit: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ForecastResponse {
    total: MetricValue,
}

impl MetricValue {
    fn parsed_amount(&self) -> Option<f64> {
        self.amount
            .as_deref()
            .and_then(|a| a.trim().parse::<f64>().ok())
            .filter(|a| a.is_finite())
    }
}

impl ResultByTime {
    fn start_date(&self) -> Option<NaiveDate> {
        let start = &self.time_period.as_ref()?.start;
        NaiveDate::parse_from_str(start, DATE_FORMAT).ok()
    }

    fn unblended_total(&self) -> Option<f64> {
        self.total.get(METRIC)?.parsed_amount()
    }
}

fn parse_cost_and_usage(raw: &str) -> Result<CostAndUsageResponse, AppError> {
    serde_json::from_str(raw).map_err(|e| AppError::InvalidResponse(e.to_string()))
}

fn parse_forecast(raw: &str) -> Result<f64, AppError> {
    let resp: ForecastResponse =
        serde_json::from_str(raw).map_err(|e| AppError::InvalidResponse(e.to_string()))?;
    resp.total
        .parsed_amount()
        .ok_or_else(|| AppError::InvalidResponse("forecast amount missing".into()))
}

/// Daily rows plus the currency reported by the first usable row.
fn daily_costs(resp: &CostAndUsageResponse) -> (Vec<DailyCost>, Option<String>) {
    let mut currency = None;
    let mut out = Vec::with_capacity(resp.results_by_time.len());
    for result in &resp.results_by_time {
        let (Some(date), Some(cost)) = (result.start_date(), result.unblended_total()) else {
            continue;
        };
        if currency.is_none() {
            currency = result.total.get(METRIC).and_then(|m| m.unit.clone());
        }
        out.push(DailyCost { date, cost });
    }
    out.sort_by_key(|d| d.date);
    (out, currency)
}

fn period_total(resp: &CostAndUsageResponse) -> f64 {
    resp.results_by_time
        .iter()
        .filter_map(ResultByTime::unblended_total)
        .sum()
}

fn service_costs(resp: &CostAndUsageResponse, month_to_date: f64) -> Vec<ServiceCost> {
    let mut by_service: HashMap<String, f64> = HashMap::new();
    for group in resp.results_by_time.iter().flat_map(|r| &r.groups) {
        let (Some(name), Some(cost)) = (
            group.keys.first(),
            group.metrics.get(METRIC).and_then(MetricValue::parsed_amount),
        ) else {
            continue;
        };
        *by_service.entry(name.clone()).or_default() += cost;
    }

    let mut services: Vec<(String, f64)> =
        by_service.into_iter().filter(|(_, cost)| *cost > 0.0).collect();
    services.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let listed: f64 = services.iter().map(|(_, cost)| cost).sum();
    let denominator = month_to_date.max(listed);
    services
        .into_iter()
        .map(|(service_name, cost)| ServiceCost {
            percentage: percentage_of(cost, denominator),
            service_name,
            cost,
        })
        .collect()
}

fn percentage_of(cost: f64, total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    cost / total * 100.0
}

fn monthly_costs(resp: &CostAndUsageResponse, first_of_month: NaiveDate) -> Vec<MonthlyCost> {
    let mut months: Vec<(NaiveDate, f64)> = resp
        .results_by_time
        .iter()
        .filter_map(|r| Some((r.start_date()?, r.unblended_total()?)))
        .collect();
    months.sort_by_key(|(start, _)| *start);
    months
        .into_iter()
        .map(|(start, cost)| MonthlyCost {
            month: start.format("%Y-%m").to_string(),
            cost,
            is_complete: start < first_of_month,
        })
        .collect()
}

fn time_period(start: NaiveDate, end: NaiveDate) -> Value {
    json!({
        "Start": start.format(DATE_FORMAT).to_string(),
        "End": end.format(DATE_FORMAT).to_string(),
    })
}

fn cost_and_usage_query(start: NaiveDate, end: NaiveDate, granularity: &str) -> Value {
    json!({
        "TimePeriod": time_period(start, end),
        "Granularity": granularity,
        "Metrics": [METRIC],
    })
}

fn service_breakdown_query(start: NaiveDate, end: NaiveDate) -> Value {
    let mut query = cost_and_usage_query(start, end, "MONTHLY");
    query["GroupBy"] = json!([{ "Type": "DIMENSION", "Key": "SERVICE" }]);
    query
}

fn forecast_query(start: NaiveDate, end: NaiveDate) -> Value {
    json!({
        "TimePeriod": time_period(start, end),
        "Metric": "UNBLENDED_COST",
        "Granularity": "MONTHLY",
    })
}

/// Cost Explorer client issuing the five billing queries for an account.
pub struct CostExplorerClient {
    http: Client,
    credentials: Arc<CredentialCache>,
    endpoint_override: Option<String>,
}

impl CostExplorerClient {
    pub fn new(
        credentials: Arc<CredentialCache>,
        endpoint_override: Option<String>,
    ) -> Result<Self, AppError> {
        let http = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            credentials,
            endpoint_override: endpoint_override.filter(|e| !e.trim().is_empty()),
        })
    }

    fn endpoint(&self, region: &str) -> String {
        self.endpoint_override
            .clone()
            .unwrap_or_else(|| format!("https://{SIGNING_SERVICE}.{region}.amazonaws.com/"))
    }

    async fn call(
        &self,
        account: &Account,
        credentials: &Credentials,
        action: &str,
        query: &Value,
    ) -> Result<String, AppError> {
        let endpoint = self.endpoint(&account.region);
        let url = Url::parse(&endpoint)
            .map_err(|e| AppError::Config(format!("invalid endpoint '{endpoint}': {e}")))?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(AppError::Config(format!("endpoint '{endpoint}' has no host"))),
        };
        let target = format!("{TARGET_PREFIX}.{action}");
        let payload = serde_json::to_vec(query)?;

        let signed = sign(
            &SignableRequest {
                method: "POST",
                path: url.path(),
                query: url.query().unwrap_or(""),
                headers: &[
                    ("content-type", CONTENT_TYPE),
                    ("host", host.as_str()),
                    ("x-amz-target", target.as_str()),
                ],
                body: &payload,
            },
            credentials,
            &account.region,
            SIGNING_SERVICE,
            Utc::now(),
        );

        let mut req = self.http.post(url.clone());
        for (name, value) in &signed {
            // reqwest derives Host from the URL.
            if name != "host" {
                req = req.header(name.as_str(), value.as_str());
            }
        }

        let response = req.body(payload).send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(account = %account.id, action, status = status.as_u16(), "cost explorer call");

        if !status.is_success() {
            if status.as_u16() == 403 {
                self.credentials.invalidate(account.profile_name.as_deref());
            }
            return Err(AppError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    async fn cost_and_usage(
        &self,
        account: &Account,
        credentials: &Credentials,
        query: Value,
    ) -> Result<CostAndUsageResponse, AppError> {
        let raw = self
            .call(account, credentials, "GetCostAndUsage", &query)
            .await?;
        parse_cost_and_usage(&raw)
    }

    async fn forecast(
        &self,
        account: &Account,
        credentials: &Credentials,
        periods: &BillingPeriods,
    ) -> Option<f64> {
        if periods.is_last_day_of_month() {
            debug!(account = %account.id, "last day of month, skipping forecast");
            return None;
        }
        let query = forecast_query(periods.tomorrow, periods.first_of_next_month);
        let result = self
            .call(account, credentials, "GetCostForecast", &query)
            .await
            .and_then(|raw| parse_forecast(&raw));
        match result {
            Ok(remaining) => Some(remaining),
            Err(e) => {
                warn!(account = %account.id, error = %e, "forecast unavailable");
                None
            }
        }
    }

    pub(crate) async fn fetch_billing_on(
        &self,
        account: &Account,
        today: NaiveDate,
    ) -> Result<BillingSnapshot, AppError> {
        if account.region.trim().is_empty() {
            return Err(AppError::NotConfigured(format!(
                "account '{}' has no region",
                account.name
            )));
        }
        let periods = BillingPeriods::for_day(today)?;
        let credentials = self
            .credentials
            .resolve(account.profile_name.as_deref())
            .await?;

        // Sequential on purpose: Cost Explorer rate-limits per account.
        let daily = self
            .cost_and_usage(
                account,
                &credentials,
                cost_and_usage_query(periods.first_of_month, periods.tomorrow, "DAILY"),
            )
            .await?;
        let last_month = self
            .cost_and_usage(
                account,
                &credentials,
                cost_and_usage_query(periods.first_of_last_month, periods.first_of_month, "MONTHLY"),
            )
            .await?;
        let by_service = self
            .cost_and_usage(
                account,
                &credentials,
                service_breakdown_query(periods.first_of_month, periods.tomorrow),
            )
            .await?;
        let history = self
            .cost_and_usage(
                account,
                &credentials,
                cost_and_usage_query(periods.six_months_ago, periods.tomorrow, "MONTHLY"),
            )
            .await?;
        let remaining = self.forecast(account, &credentials, &periods).await;

        let (daily_costs, currency) = daily_costs(&daily);
        let month_to_date: f64 = daily_costs.iter().map(|d| d.cost).sum();
        let snapshot = BillingSnapshot {
            account_id: account.id.clone(),
            account_name: account.name.clone(),
            month_to_date_cost: month_to_date,
            last_month_cost: period_total(&last_month),
            forecasted_month_cost: remaining.map(|r| month_to_date + r),
            daily_average: month_to_date / f64::from(today.day()),
            cost_by_service: service_costs(&by_service, month_to_date),
            daily_costs,
            monthly_costs: monthly_costs(&history, periods.first_of_month),
            fetched_at: Utc::now(),
            currency: currency.unwrap_or_else(|| "USD".to_string()),
        };
        info!(
            account = %account.id,
            month_to_date = snapshot.month_to_date_cost,
            services = snapshot.cost_by_service.len(),
            "billing fetched"
        );
        Ok(snapshot)
    }
}

#[async_trait]
impl BillingFetcher for CostExplorerClient {
    async fn fetch_billing(&self, account: &Account) -> Result<BillingSnapshot, AppError> {
        self.fetch_billing_on(account, Utc::now().date_naive()).await
    }

    fn forget_credentials(&self) {
        self.credentials.invalidate_all();
        debug!("cached credentials dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{body_partial_json, header, header_exists, method};
    use wiremock::{Mock, MockBuilder, MockServer, ResponseTemplate};

    struct StaticProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CredentialProvider for StaticProvider {
        fn name(&self) -> &'static str {
            "static"
        }

        async fn resolve(&self, _profile: Option<&str>) -> Result<Credentials, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Credentials::new("AKID", "secret", Some("token".into()), None))
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn account() -> Account {
        Account::new("Prod", "123456789012", "us-east-1").with_profile(Some("prod".into()))
    }

    fn client(server: &MockServer) -> (CostExplorerClient, Arc<StaticProvider>) {
        let provider = Arc::new(StaticProvider {
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(CredentialCache::new(provider.clone()));
        let client = CostExplorerClient::new(cache, Some(format!("{}/", server.uri())))
            .expect("build client");
        (client, provider)
    }

    fn results(rows: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({ "ResultsByTime": rows }))
    }

    fn total(start: &str, amount: &str) -> Value {
        json!({
            "TimePeriod": { "Start": start },
            "Total": { "UnblendedCost": { "Amount": amount, "Unit": "USD" } },
        })
    }

    fn cost_and_usage(start: &str, granularity: &str) -> MockBuilder {
        Mock::given(method("POST"))
            .and(header("x-amz-target", "AWSInsightsIndexService.GetCostAndUsage"))
            .and(header("content-type", CONTENT_TYPE))
            .and(header_exists("authorization"))
            .and(header("x-amz-security-token", "token"))
            .and(body_partial_json(json!({
                "TimePeriod": { "Start": start },
                "Granularity": granularity,
            })))
    }

    async fn mount_march_history(server: &MockServer) {
        cost_and_usage("2024-03-01", "DAILY")
            .respond_with(results(json!([
                total("2024-03-01", "60.0"),
                total("2024-03-02", "not-a-number"),
                total("2024-03-03", "90.0"),
            ])))
            .expect(1)
            .mount(server)
            .await;
        cost_and_usage("2024-02-01", "MONTHLY")
            .respond_with(results(json!([total("2024-02-01", "100.0")])))
            .expect(1)
            .mount(server)
            .await;
        cost_and_usage("2024-03-01", "MONTHLY")
            .and(body_partial_json(json!({
                "GroupBy": [{ "Type": "DIMENSION", "Key": "SERVICE" }],
            })))
            .respond_with(results(json!([{
                "TimePeriod": { "Start": "2024-03-01" },
                "Groups": [
                    { "Keys": ["AWS Lambda"], "Metrics": { "UnblendedCost": { "Amount": "30" } } },
                    { "Keys": ["Amazon Elastic Compute Cloud - Compute"], "Metrics": { "UnblendedCost": { "Amount": "120" } } },
                    { "Keys": ["Tax"], "Metrics": { "UnblendedCost": { "Amount": "0" } } },
                    { "Keys": ["Refund"], "Metrics": { "UnblendedCost": { "Amount": "-5" } } },
                ],
            }])))
            .expect(1)
            .mount(server)
            .await;
        cost_and_usage("2023-10-01", "MONTHLY")
            .respond_with(results(json!([
                total("2024-03-01", "150.0"),
                total("2023-12-01", "80.0"),
                total("2024-01-01", "bogus"),
                total("2024-02-01", "100.0"),
            ])))
            .expect(1)
            .mount(server)
            .await;
    }

    #[test]
    fn billing_periods_cover_expected_windows() {
        let p = BillingPeriods::for_day(day(2024, 3, 10)).expect("periods");
        assert_eq!(p.first_of_month, day(2024, 3, 1));
        assert_eq!(p.tomorrow, day(2024, 3, 11));
        assert_eq!(p.first_of_last_month, day(2024, 2, 1));
        assert_eq!(p.first_of_next_month, day(2024, 4, 1));
        assert_eq!(p.six_months_ago, day(2023, 10, 1));
        assert!(!p.is_last_day_of_month());

        let jan = BillingPeriods::for_day(day(2024, 1, 31)).expect("periods");
        assert_eq!(jan.first_of_last_month, day(2023, 12, 1));
        assert_eq!(jan.tomorrow, day(2024, 2, 1));
        assert!(jan.is_last_day_of_month());
    }

    #[test]
    fn service_percentages_use_month_to_date_total() {
        let resp = parse_cost_and_usage(
            r#"{"ResultsByTime":[{"Groups":[
                {"Keys":["AWS Lambda"],"Metrics":{"UnblendedCost":{"Amount":"50"}}},
                {"Keys":["Amazon S3"],"Metrics":{"UnblendedCost":{"Amount":"150"}}}
            ]}]}"#,
        )
        .expect("parse");
        let services = service_costs(&resp, 200.0);
        assert_eq!(services[0].service_name, "Amazon S3");
        assert_eq!(services[1].percentage, 25.0);
        assert!(services.iter().map(|s| s.percentage).sum::<f64>() <= 100.0);
    }

    #[test]
    fn service_percentages_never_exceed_one_hundred() {
        let resp = parse_cost_and_usage(
            r#"{"ResultsByTime":[{"Groups":[
                {"Keys":["A"],"Metrics":{"UnblendedCost":{"Amount":"80"}}},
                {"Keys":["B"],"Metrics":{"UnblendedCost":{"Amount":"40"}}}
            ]}]}"#,
        )
        .expect("parse");
        let services = service_costs(&resp, 100.0);
        let sum: f64 = services.iter().map(|s| s.percentage).sum();
        assert!(sum <= 100.0 + 1e-9);
    }

    #[test]
    fn malformed_payload_is_invalid_response() {
        assert!(matches!(
            parse_cost_and_usage("{\"Nope\":[]}"),
            Err(AppError::InvalidResponse(_))
        ));
        assert!(matches!(parse_forecast("[]"), Err(AppError::InvalidResponse(_))));
        assert_eq!(
            parse_forecast(r#"{"Total":{"Amount":"12.5","Unit":"USD"}}"#).expect("forecast"),
            12.5
        );
    }

    #[tokio::test]
    async fn fetch_builds_snapshot_from_five_queries() {
        let server = MockServer::start().await;
        mount_march_history(&server).await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", "AWSInsightsIndexService.GetCostForecast"))
            .and(body_partial_json(json!({
                "TimePeriod": { "Start": "2024-03-11", "End": "2024-04-01" },
                "Metric": "UNBLENDED_COST",
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "Total": { "Amount": "210.0", "Unit": "USD" } })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (client, provider) = client(&server);
        let acct = account();
        let snap = client
            .fetch_billing_on(&acct, day(2024, 3, 10))
            .await
            .expect("fetch billing");

        assert_eq!(snap.account_id, acct.id);
        assert_eq!(snap.month_to_date_cost, 150.0);
        assert_eq!(snap.daily_costs.len(), 2);
        assert_eq!(snap.last_month_cost, 100.0);
        assert_eq!(snap.forecasted_month_cost, Some(360.0));
        assert!((snap.daily_average - 15.0).abs() < 1e-9);
        assert_eq!(snap.currency, "USD");
        assert_eq!(snap.month_over_month_change(), Some(50.0));

        let names: Vec<&str> = snap.cost_by_service.iter().map(|s| s.short_name()).collect();
        assert_eq!(names, vec!["Elastic Compute Cloud - Compute", "Lambda"]);
        assert_eq!(snap.cost_by_service[0].percentage, 80.0);
        assert_eq!(snap.cost_by_service[1].percentage, 20.0);

        let months: Vec<(&str, bool)> = snap
            .monthly_costs
            .iter()
            .map(|m| (m.month.as_str(), m.is_complete))
            .collect();
        assert_eq!(
            months,
            vec![("2023-12", true), ("2024-02", true), ("2024-03", false)]
        );
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn forecast_failure_is_swallowed() {
        let server = MockServer::start().await;
        mount_march_history(&server).await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", "AWSInsightsIndexService.GetCostForecast"))
            .respond_with(ResponseTemplate::new(400).set_body_string(
                r#"{"__type":"DataUnavailableException","message":"Insufficient amount of historical data"}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let (client, _) = client(&server);
        let snap = client
            .fetch_billing_on(&account(), day(2024, 3, 10))
            .await
            .expect("fetch billing");
        assert!(snap.forecasted_month_cost.is_none());
        assert_eq!(snap.month_to_date_cost, 150.0);
    }

    #[tokio::test]
    async fn forecast_is_skipped_on_last_day_of_month() {
        let server = MockServer::start().await;
        cost_and_usage("2024-03-01", "DAILY")
            .respond_with(results(json!([total("2024-03-01", "31.0")])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", "AWSInsightsIndexService.GetCostAndUsage"))
            .respond_with(results(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", "AWSInsightsIndexService.GetCostForecast"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (client, _) = client(&server);
        let snap = client
            .fetch_billing_on(&account(), day(2024, 3, 31))
            .await
            .expect("fetch billing");
        assert!(snap.forecasted_month_cost.is_none());
        assert!((snap.daily_average - 1.0).abs() < 1e-9);
        assert!(snap.cost_by_service.is_empty());
    }

    #[tokio::test]
    async fn api_error_fails_fetch_and_drops_cached_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("ExpiredTokenException"))
            .expect(2)
            .mount(&server)
            .await;

        let (client, provider) = client(&server);
        let acct = account();
        for _ in 0..2 {
            let err = client
                .fetch_billing_on(&acct, day(2024, 3, 10))
                .await
                .expect_err("fetch should fail");
            match err {
                AppError::Api { status, body } => {
                    assert_eq!(status, 403);
                    assert_eq!(body, "ExpiredTokenException");
                }
                other => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn forgetting_credentials_forces_a_fresh_lookup() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(results(json!([total("2024-03-01", "1.00")])))
            .mount(&server)
            .await;

        let (client, provider) = client(&server);
        let acct = account();
        client
            .fetch_billing_on(&acct, day(2024, 3, 10))
            .await
            .expect("first fetch");
        client
            .fetch_billing_on(&acct, day(2024, 3, 10))
            .await
            .expect("cached fetch");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        client.forget_credentials();
        client
            .fetch_billing_on(&acct, day(2024, 3, 10))
            .await
            .expect("fetch after reset");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_region_is_not_configured() {
        let server = MockServer::start().await;
        let (client, provider) = client(&server);
        let mut acct = account();
        acct.region = " ".into();
        let err = client
            .fetch_billing_on(&acct, day(2024, 3, 10))
            .await
            .expect_err("fetch should fail");
        assert!(matches!(err, AppError::NotConfigured(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }
}
