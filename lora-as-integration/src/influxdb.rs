//! InfluxDB sink writing line protocol to the v1 `/write` endpoint.
//!
//! Uplinks produce one `device_frmpayload_data_<path>` measurement per leaf
//! of the decoded object plus a `device_uplink` measurement; status and
//! location events map to `device_status_*` and `device_location`. Other
//! events are not written.
use crate::{
    error::{IntegrationError, IntegrationResult},
    events::{Event, LocationEvent, StatusEvent, UplinkEvent},
    IntegrationHandler,
};
use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::BTreeMap, fmt::Write as _, time::Duration};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfluxDbConfig {
    #[serde(default = "InfluxDbConfig::endpoint_default")]
    pub endpoint: String,
    pub db: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub retention_policy_name: String,
    /// One of `ns`, `u`, `ms`, `s`, `m`, `h`.
    #[serde(default = "InfluxDbConfig::precision_default")]
    pub precision: String,
    #[serde(default = "InfluxDbConfig::timeout_ms_default")]
    pub timeout_ms: u64,
}

impl Default for InfluxDbConfig {
    fn default() -> Self {
        Self {
            endpoint: Self::endpoint_default(),
            db: String::new(),
            username: String::new(),
            password: String::new(),
            retention_policy_name: String::new(),
            precision: Self::precision_default(),
            timeout_ms: Self::timeout_ms_default(),
        }
    }
}

impl InfluxDbConfig {
    fn endpoint_default() -> String {
        "http://localhost:8086/write".into()
    }

    fn precision_default() -> String {
        "s".into()
    }

    fn timeout_ms_default() -> u64 {
        5_000
    }

    fn write_url(&self) -> IntegrationResult<Url> {
        let mut url = Url::parse(&self.endpoint).map_err(|e| {
            IntegrationError::Configuration(format!("invalid influxdb endpoint: {e}"))
        })?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("db", &self.db);
            q.append_pair("precision", &self.precision);
            if !self.retention_policy_name.is_empty() {
                q.append_pair("rp", &self.retention_policy_name);
            }
        }
        Ok(url)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum FieldValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    Str(String),
}

impl FieldValue {
    fn write_to(&self, out: &mut String) {
        match self {
            FieldValue::Float(v) => {
                let _ = write!(out, "{v:?}");
            }
            FieldValue::Int(v) => {
                let _ = write!(out, "{v}i");
            }
            FieldValue::Bool(v) => {
                let _ = write!(out, "{v}");
            }
            FieldValue::Str(v) => {
                out.push('"');
                out.push_str(&v.replace('\\', "\\\\").replace('"', "\\\""));
                out.push('"');
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Measurement {
    name: String,
    tags: BTreeMap<&'static str, String>,
    fields: BTreeMap<String, FieldValue>,
}

impl Measurement {
    fn new(name: impl Into<String>, tags: BTreeMap<&'static str, String>) -> Self {
        Self {
            name: name.into(),
            tags,
            fields: BTreeMap::new(),
        }
    }

    fn field(mut self, key: &str, value: FieldValue) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    fn line(&self) -> String {
        let mut out = escape(&self.name, &[',', ' ']);
        for (k, v) in &self.tags {
            if v.is_empty() {
                continue;
            }
            let _ = write!(out, ",{}={}", k, escape(v, &[',', '=', ' ']));
        }
        for (i, (k, v)) in self.fields.iter().enumerate() {
            out.push(if i == 0 { ' ' } else { ',' });
            out.push_str(&escape(k, &[',', '=', ' ']));
            out.push('=');
            v.write_to(&mut out);
        }
        out
    }
}

fn escape(s: &str, chars: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if chars.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn device_tags(application_name: &str, device_name: &str, dev_eui: &[u8]) -> BTreeMap<&'static str, String> {
    BTreeMap::from([
        ("application_name", application_name.to_string()),
        ("device_name", device_name.to_string()),
        ("dev_eui", hex::encode(dev_eui)),
    ])
}

/// Depth-first flattening of the decoded object, keys joined with `_`.
fn flatten(prefix: &str, v: &Value, out: &mut Vec<(String, FieldValue)>) {
    match v {
        Value::Object(map) => {
            for (k, v) in map {
                flatten(&join_key(prefix, k), v, out);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                flatten(&join_key(prefix, &i.to_string()), v, out);
            }
        }
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                out.push((prefix.to_string(), FieldValue::Float(f)));
            }
        }
        Value::Bool(b) => out.push((prefix.to_string(), FieldValue::Bool(*b))),
        Value::String(s) => out.push((prefix.to_string(), FieldValue::Str(s.clone()))),
        Value::Null => {}
    }
}

fn join_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}_{key}")
    }
}

fn uplink_measurements(pl: &UplinkEvent) -> Vec<Measurement> {
    let tags = device_tags(&pl.application_name, &pl.device_name, &pl.dev_eui);
    let mut out = Vec::new();

    if !pl.object_json.is_empty() {
        if let Ok(object) = serde_json::from_str::<Value>(&pl.object_json) {
            let mut leaves = Vec::new();
            flatten("", &object, &mut leaves);
            for (path, value) in leaves {
                let mut t = tags.clone();
                t.insert("f_port", pl.f_port.to_string());
                out.push(
                    Measurement::new(format!("device_frmpayload_data_{path}"), t)
                        .field("value", value),
                );
            }
        }
    }

    let mut t = tags;
    t.insert("dr", pl.dr.to_string());
    if let Some(tx) = &pl.tx_info {
        t.insert("frequency", tx.frequency.to_string());
    }
    let mut m = Measurement::new("device_uplink", t)
        .field("f_cnt", FieldValue::Int(pl.f_cnt as i64))
        .field("value", FieldValue::Int(1));
    let best = pl
        .rx_info
        .iter()
        .max_by(|a, b| a.lora_snr.total_cmp(&b.lora_snr));
    if let Some(rx) = best {
        m = m
            .field("rssi", FieldValue::Int(rx.rssi as i64))
            .field("snr", FieldValue::Float(rx.lora_snr));
    }
    out.push(m);
    out
}

fn status_measurements(pl: &StatusEvent) -> Vec<Measurement> {
    let tags = device_tags(&pl.application_name, &pl.device_name, &pl.dev_eui);
    let mut out = Vec::new();
    if !pl.external_power_source && !pl.battery_level_unavailable {
        out.push(
            Measurement::new("device_status_battery", tags.clone())
                .field("value", FieldValue::Float(pl.battery_level as f64)),
        );
    }
    out.push(
        Measurement::new("device_status_margin", tags)
            .field("value", FieldValue::Int(pl.margin as i64)),
    );
    out
}

fn location_measurements(pl: &LocationEvent) -> Vec<Measurement> {
    let Some(loc) = &pl.location else {
        return Vec::new();
    };
    let tags = device_tags(&pl.application_name, &pl.device_name, &pl.dev_eui);
    vec![Measurement::new("device_location", tags)
        .field("latitude", FieldValue::Float(loc.latitude))
        .field("longitude", FieldValue::Float(loc.longitude))
        .field("altitude", FieldValue::Float(loc.altitude))]
}

fn measurements(event: Event<'_>) -> Vec<Measurement> {
    match event {
        Event::Up(pl) => uplink_measurements(pl),
        Event::Status(pl) => status_measurements(pl),
        Event::Location(pl) => location_measurements(pl),
        Event::Join(_) | Event::Ack(_) | Event::Error(_) => Vec::new(),
    }
}

pub struct InfluxDbIntegration {
    client: Client,
    config: InfluxDbConfig,
    url: Url,
}

impl InfluxDbIntegration {
    pub fn new(config: InfluxDbConfig) -> IntegrationResult<Self> {
        if config.db.is_empty() {
            return Err(IntegrationError::Configuration("influxdb db is empty".into()));
        }
        let url = config.write_url()?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            config,
            url,
        })
    }
}

#[async_trait]
impl IntegrationHandler for InfluxDbIntegration {
    fn kind(&self) -> &'static str {
        "influxdb"
    }

    async fn publish(&self, event: Event<'_>) -> IntegrationResult<()> {
        let lines: Vec<String> = measurements(event).iter().map(Measurement::line).collect();
        if lines.is_empty() {
            return Ok(());
        }

        let mut req = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "text/plain")
            .body(lines.join("\n"));
        if !self.config.username.is_empty() {
            req = req.basic_auth(&self.config.username, Some(&self.config.password));
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(IntegrationError::Publish(format!(
                "influxdb returned {}",
                resp.status()
            )));
        }
        debug!(lines = lines.len(), "InfluxDB points written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Location, RxInfo, TxInfo};

    fn uplink() -> UplinkEvent {
        UplinkEvent {
            application_id: 1,
            application_name: "test app".into(),
            device_name: "dev".into(),
            dev_eui: vec![1, 2, 3, 4, 5, 6, 7, 8],
            dr: 3,
            f_cnt: 10,
            f_port: 20,
            tx_info: Some(TxInfo {
                frequency: 868100000,
                dr: 3,
            }),
            rx_info: vec![
                RxInfo {
                    rssi: -60,
                    lora_snr: 5.5,
                    ..Default::default()
                },
                RxInfo {
                    rssi: -80,
                    lora_snr: 1.0,
                    ..Default::default()
                },
            ],
            object_json: r#"{"temperature":22.5,"door":{"open":true},"label":"a b"}"#.into(),
            ..Default::default()
        }
    }

    #[test]
    fn uplink_lines() {
        let lines: Vec<String> = uplink_measurements(&uplink()).iter().map(Measurement::line).collect();
        assert_eq!(
            lines,
            vec![
                "device_frmpayload_data_door_open,application_name=test\\ app,dev_eui=0102030405060708,device_name=dev,f_port=20 value=true",
                "device_frmpayload_data_label,application_name=test\\ app,dev_eui=0102030405060708,device_name=dev,f_port=20 value=\"a b\"",
                "device_frmpayload_data_temperature,application_name=test\\ app,dev_eui=0102030405060708,device_name=dev,f_port=20 value=22.5",
                "device_uplink,application_name=test\\ app,dev_eui=0102030405060708,device_name=dev,dr=3,frequency=868100000 f_cnt=10i,rssi=-60i,snr=5.5,value=1i",
            ]
        );
    }

    #[test]
    fn status_skips_battery_on_external_power() {
        let pl = StatusEvent {
            device_name: "dev".into(),
            dev_eui: vec![1; 8],
            margin: 7,
            external_power_source: true,
            battery_level: 50.0,
            ..Default::default()
        };
        let m = status_measurements(&pl);
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].name, "device_status_margin");
        assert!(m[0].line().ends_with(" value=7i"));
    }

    #[test]
    fn location_line() {
        let pl = LocationEvent {
            device_name: "dev".into(),
            dev_eui: vec![1; 8],
            location: Some(Location {
                latitude: 1.5,
                longitude: 2.0,
                altitude: 3.25,
            }),
            ..Default::default()
        };
        let m = location_measurements(&pl);
        assert_eq!(
            m[0].line(),
            "device_location,dev_eui=0101010101010101,device_name=dev altitude=3.25,latitude=1.5,longitude=2.0"
        );
    }

    #[test]
    fn write_url_includes_retention_policy() {
        let c = InfluxDbConfig {
            db: "lora".into(),
            retention_policy_name: "autogen".into(),
            ..Default::default()
        };
        assert_eq!(
            c.write_url().unwrap().as_str(),
            "http://localhost:8086/write?db=lora&precision=s&rp=autogen"
        );
    }
}
