use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use regulator_common::{ActuatorSnapshot, NameIdMap, RegulatorConfig};

use super::{ActuatorAdapter, FetchError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct EtaAdapter {
    http: Client,
}

impl EtaAdapter {
    pub fn new() -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build controller http client")?;
        Ok(Self { http })
    }

    fn var_url(config: &RegulatorConfig, id: &str) -> String {
        let address = config.controller_address.trim_end_matches('/');
        if address.starts_with("http://") || address.starts_with("https://") {
            format!("{address}/user/var/{id}")
        } else {
            format!("http://{address}/user/var/{id}")
        }
    }
}

#[async_trait]
impl ActuatorAdapter for EtaAdapter {
    async fn fetch_snapshot(
        &self,
        config: &RegulatorConfig,
        names: &NameIdMap,
    ) -> Result<ActuatorSnapshot, FetchError> {
        let mut snapshot = ActuatorSnapshot::new();
        for (name, entry) in names.entries() {
            match self.fetch_variable(config, &entry.id).await? {
                Some(value) => snapshot.set(entry.id.clone(), value),
                None => debug!(variable = %name, id = %entry.id, "controller has no value"),
            }
        }
        debug!(variables = snapshot.len(), "controller snapshot fetched");
        Ok(snapshot)
    }

    async fn write_variable(
        &self,
        config: &RegulatorConfig,
        id: &str,
        value: &str,
        flags: &str,
        index: &str,
    ) -> Result<(), FetchError> {
        let body = self
            .http
            .post(Self::var_url(config, id))
            .form(&[("value", value), ("begin", flags), ("end", index)])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        match error_message(&body) {
            Some(message) => Err(FetchError::Unavailable(format!(
                "controller rejected write of {id}: {message}"
            ))),
            None => Ok(()),
        }
    }

    async fn fetch_variable(
        &self,
        config: &RegulatorConfig,
        id: &str,
    ) -> Result<Option<String>, FetchError> {
        let body = self
            .http
            .get(Self::var_url(config, id))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        if let Some(message) = error_message(&body) {
            return Err(FetchError::Unavailable(format!(
                "controller rejected read of {id}: {message}"
            )));
        }
        Ok(str_value(&body))
    }
}

pub fn str_value(body: &str) -> Option<String> {
    let (tag, _) = find_tag(body, "value")?;
    attribute(tag, "strValue").map(unescape)
}

pub fn error_message(body: &str) -> Option<String> {
    let (tag, content) = find_tag(body, "error")?;
    let message = if tag.ends_with('/') {
        ""
    } else {
        content
            .find("</error>")
            .map_or(content, |end| &content[..end])
            .trim()
    };
    Some(if message.is_empty() {
        "unspecified error".to_string()
    } else {
        unescape(message)
    })
}

// Splits at the first `<name ...>` element into the tag (without `>`) and
// what follows it. `<values>` does not match `value`.
fn find_tag<'a>(body: &'a str, name: &str) -> Option<(&'a str, &'a str)> {
    let open = format!("<{name}");
    let mut offset = 0;
    while let Some(found) = body[offset..].find(&open) {
        let start = offset + found;
        let rest = &body[start..];
        let next = rest[open.len()..].chars().next()?;
        if next == '>' || next == '/' || next.is_whitespace() {
            let end = rest.find('>')?;
            return Some((&rest[..end], &rest[end + 1..]));
        }
        offset = start + open.len();
    }
    None
}

fn attribute<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let mut offset = 0;
    while let Some(found) = tag[offset..].find(name) {
        let start = offset + found;
        offset = start + name.len();
        let preceded_by_space = tag[..start].ends_with(char::is_whitespace);
        let Some(rest) = tag[offset..].trim_start().strip_prefix('=') else {
            continue;
        };
        if !preceded_by_space {
            continue;
        }
        let rest = rest.trim_start();
        let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
        let value = &rest[1..];
        return value.find(quote).map(|end| &value[..end]);
    }
    None
}

fn unescape(raw: &str) -> String {
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const READ_RESPONSE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<eta version="1.0" xmlns="http://www.eta.co.at/rest/v1"><value uri="/user/var/112/10021/0/0/12080" strValue="Aus" unit="" decPlaces="0" scaleFactor="1" advTextOffset="1802">1802</value></eta>"#;

    #[test]
    fn extracts_display_value() {
        assert_eq!(str_value(READ_RESPONSE).as_deref(), Some("Aus"));
    }

    #[test]
    fn extracts_numeric_display_value() {
        let body = r#"<eta><value uri="/user/var/40/10021/0/0/12346" unit="%" strValue="35,5" scaleFactor="10">355</value></eta>"#;

        assert_eq!(str_value(body).as_deref(), Some("35,5"));
    }

    #[test]
    fn unescapes_entities() {
        let body = r#"<eta><value strValue="Ein &amp; Aus">1</value></eta>"#;

        assert_eq!(str_value(body).as_deref(), Some("Ein & Aus"));
    }

    #[test]
    fn missing_value_element_yields_none() {
        assert_eq!(str_value(r#"<eta><success uri="/user/var/1"/></eta>"#), None);
        assert_eq!(str_value(""), None);
    }

    #[test]
    fn detects_error_element() {
        let body = r#"<eta version="1.0"><error>Invalid URI</error></eta>"#;

        assert_eq!(error_message(body).as_deref(), Some("Invalid URI"));
        assert_eq!(error_message(READ_RESPONSE), None);
    }

    #[test]
    fn builds_var_url_from_address() {
        let mut config = RegulatorConfig::default();
        config.controller_address = "192.168.1.20:8080".to_string();
        assert_eq!(
            EtaAdapter::var_url(&config, "112/10021/0/0/12080"),
            "http://192.168.1.20:8080/user/var/112/10021/0/0/12080"
        );

        config.controller_address = "http://eta.local/".to_string();
        assert_eq!(
            EtaAdapter::var_url(&config, "40"),
            "http://eta.local/user/var/40"
        );
    }

    #[test]
    fn plural_element_is_not_a_value() {
        let body = r#"<eta><values count="1"><value strValue="Ein">1</value></values></eta>"#;

        assert_eq!(str_value(body).as_deref(), Some("Ein"));
        assert_eq!(str_value(r#"<eta><values strValue="x"/></eta>"#), None);
    }

    #[test]
    fn single_quoted_attribute() {
        let body = "<eta><value uri='/user/var/40' strValue='4,5'>45</value></eta>";

        assert_eq!(str_value(body).as_deref(), Some("4,5"));
    }

    #[test]
    fn attribute_name_must_match_whole() {
        let body = r#"<eta><value xstrValue="no" strValue="yes">1</value></eta>"#;

        assert_eq!(str_value(body).as_deref(), Some("yes"));
    }

    #[test]
    fn empty_error_element_still_counts() {
        assert_eq!(
            error_message("<eta><error/></eta>").as_deref(),
            Some("unspecified error")
        );
        assert_eq!(error_message("<eta><errors/></eta>"), None);
    }

    mod http {
        use std::{
            collections::HashMap,
            net::SocketAddr,
            sync::{Arc, Mutex},
        };

        use axum::{
            extract::{Path, State},
            http::StatusCode,
            routing::get,
            Form, Router,
        };
        use pretty_assertions::assert_eq;

        use super::super::*;
        use crate::testing::serve;

        type Recorded = Arc<Mutex<Vec<HashMap<String, String>>>>;

        const SUCCESS: &str = r#"<eta version="1.0"><success uri="/user/var/104"/></eta>"#;

        fn config(addr: SocketAddr) -> RegulatorConfig {
            RegulatorConfig {
                controller_address: addr.to_string(),
                ..RegulatorConfig::default()
            }
        }

        fn names() -> NameIdMap {
            let mut names = NameIdMap::default();
            names.insert("Schieber Position", "104", "%");
            names.insert("Außentemperatur", "105", "°C");
            names
        }

        fn controller(status: StatusCode, write_body: &'static str) -> (Router, Recorded) {
            let recorded = Recorded::default();
            let router = Router::new()
                .route(
                    "/user/var/{*id}",
                    get(move |Path(id): Path<String>| async move {
                        match id.as_str() {
                            "105" => (status, "<eta></eta>".to_string()),
                            _ => (
                                status,
                                format!(r#"<eta><value uri="/user/var/{id}" strValue="Ein">1</value></eta>"#),
                            ),
                        }
                    })
                    .post(
                        move |State(recorded): State<Recorded>,
                              Form(fields): Form<HashMap<String, String>>| async move {
                            recorded.lock().unwrap().push(fields);
                            (status, write_body)
                        },
                    ),
                )
                .with_state(recorded.clone());
            (router, recorded)
        }

        #[tokio::test]
        async fn missing_reading_leaves_id_absent() {
            let (router, _) = controller(StatusCode::OK, SUCCESS);
            let addr = serve(router).await;

            let snapshot = EtaAdapter::new()
                .unwrap()
                .fetch_snapshot(&config(addr), &names())
                .await
                .unwrap();

            assert_eq!(snapshot.len(), 1);
            assert_eq!(snapshot.get("104"), Some("Ein"));
            assert_eq!(snapshot.get("105"), None);
        }

        #[tokio::test]
        async fn too_many_requests_is_rate_limited() {
            let (router, _) = controller(StatusCode::TOO_MANY_REQUESTS, SUCCESS);
            let addr = serve(router).await;

            let result = EtaAdapter::new()
                .unwrap()
                .fetch_variable(&config(addr), "104")
                .await;

            assert!(matches!(result, Err(FetchError::RateLimited(_))), "{result:?}");
        }

        #[tokio::test]
        async fn server_error_is_unavailable() {
            let (router, _) = controller(StatusCode::INTERNAL_SERVER_ERROR, SUCCESS);
            let addr = serve(router).await;

            let result = EtaAdapter::new()
                .unwrap()
                .fetch_snapshot(&config(addr), &names())
                .await;

            assert!(matches!(result, Err(FetchError::Unavailable(_))), "{result:?}");
        }

        #[tokio::test]
        async fn write_posts_value_begin_end() {
            let (router, recorded) = controller(StatusCode::OK, SUCCESS);
            let addr = serve(router).await;

            EtaAdapter::new()
                .unwrap()
                .write_variable(&config(addr), "104", "355", "0", "0")
                .await
                .unwrap();

            let fields = recorded.lock().unwrap().clone();
            assert_eq!(
                fields,
                vec![HashMap::from([
                    ("value".to_string(), "355".to_string()),
                    ("begin".to_string(), "0".to_string()),
                    ("end".to_string(), "0".to_string()),
                ])]
            );
        }

        #[tokio::test]
        async fn error_body_fails_the_write() {
            let (router, _) = controller(
                StatusCode::OK,
                r#"<eta version="1.0"><error>Value out of range</error></eta>"#,
            );
            let addr = serve(router).await;

            let result = EtaAdapter::new()
                .unwrap()
                .write_variable(&config(addr), "104", "5000", "0", "0")
                .await;

            assert_eq!(
                result,
                Err(FetchError::Unavailable(
                    "controller rejected write of 104: Value out of range".to_string()
                ))
            );
        }

        #[tokio::test]
        async fn rejected_status_fails_the_write() {
            let (router, _) = controller(StatusCode::SERVICE_UNAVAILABLE, SUCCESS);
            let addr = serve(router).await;

            let result = EtaAdapter::new()
                .unwrap()
                .write_variable(&config(addr), "104", "355", "0", "0")
                .await;

            assert!(matches!(result, Err(FetchError::Unavailable(_))), "{result:?}");
        }
    }
}
