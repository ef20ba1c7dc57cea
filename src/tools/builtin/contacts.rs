//! `lookup_contact`: who is this person?

use std::sync::{Arc, LazyLock};
use std::time::Instant;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::GoogleConfig;
use crate::google::GoogleClient;
use crate::pipeline::sender::normalize_address;
use crate::pipeline::types::Item;
use crate::tools::tool::{Tool, ToolError, ToolOutput, optional_count, require_str};

const DEFAULT_MAX_RESULTS: u64 = 5;
const MAX_RESULTS: u64 = 10;
const READ_MASK: &str = "names,emailAddresses,phoneNumbers,organizations";

static ASKS_ABOUT_PEOPLE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(contact (info|information|details)|phone number|email address for|introduc(e|tion)|who (is|was) [a-z]+|put (me|us) in touch|do you know [a-z]+)",
    )
    .ok()
});

static EMAIL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").ok());

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub email: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub organization: Option<String>,
    pub job_title: Option<String>,
}

impl ContactInfo {
    pub fn display(&self) -> String {
        let mut parts = Vec::new();
        if let Some(name) = &self.name {
            parts.push(name.clone());
        }
        match (&self.job_title, &self.organization) {
            (Some(title), Some(org)) => parts.push(format!("{title} at {org}")),
            (None, Some(org)) => parts.push(org.clone()),
            (Some(title), None) => parts.push(title.clone()),
            (None, None) => {}
        }
        parts.push(format!("<{}>", self.email));
        parts.join(" - ")
    }
}

/// Best-effort name from an address: `john.doe@x` → "John Doe".
pub fn name_from_address(email: &str) -> Option<String> {
    let local = email.split('@').next()?;
    let capitalize = |part: &str| {
        let mut chars = part.chars();
        chars
            .next()
            .map(|c| c.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect::<String>())
            .unwrap_or_default()
    };
    for sep in ['.', '_'] {
        if local.contains(sep) {
            let name: Vec<String> = local
                .split(sep)
                .filter(|p| !p.is_empty())
                .map(capitalize)
                .collect();
            return (!name.is_empty()).then(|| name.join(" "));
        }
    }
    (!local.is_empty() && local.chars().all(char::is_alphabetic)).then(|| capitalize(local))
}

/// Contact directory lookups.
#[async_trait]
pub trait ContactBackend: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<ContactInfo>, ToolError>;
}

/// Google People API `searchContacts`.
pub struct GooglePeople {
    client: GoogleClient,
    base_url: String,
}

impl GooglePeople {
    pub fn new(client: GoogleClient, config: &GoogleConfig) -> Self {
        Self {
            client,
            base_url: config.people_base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    person: Person,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Person {
    #[serde(default)]
    names: Vec<Named>,
    #[serde(default)]
    email_addresses: Vec<Valued>,
    #[serde(default)]
    phone_numbers: Vec<Valued>,
    #[serde(default)]
    organizations: Vec<Organization>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Named {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Valued {
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Organization {
    name: Option<String>,
    title: Option<String>,
}

impl Person {
    fn into_contact(self) -> Option<ContactInfo> {
        let email = self.email_addresses.into_iter().find_map(|e| e.value)?;
        let org = self.organizations.into_iter().next();
        Some(ContactInfo {
            email,
            name: self.names.into_iter().find_map(|n| n.display_name),
            phone: self.phone_numbers.into_iter().find_map(|p| p.value),
            organization: org.as_ref().and_then(|o| o.name.clone()),
            job_title: org.and_then(|o| o.title),
        })
    }
}

#[async_trait]
impl ContactBackend for GooglePeople {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<ContactInfo>, ToolError> {
        let response: SearchResponse = self
            .client
            .get_json(
                "people_search",
                &format!("{}/people:searchContacts", self.base_url),
                &[
                    ("query", query.to_string()),
                    ("readMask", READ_MASK.to_string()),
                    ("pageSize", max_results.to_string()),
                ],
            )
            .await?;
        Ok(response
            .results
            .into_iter()
            .filter_map(|r| r.person.into_contact())
            .collect())
    }
}

pub struct LookupContactTool {
    backend: Arc<dyn ContactBackend>,
}

impl LookupContactTool {
    pub fn new(backend: Arc<dyn ContactBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for LookupContactTool {
    fn name(&self) -> &str {
        "lookup_contact"
    }

    fn description(&self) -> &str {
        "Look up contact information by email or name. Returns name, phone, \
         organization and job title. Applies when the sender asks about a person \
         or wants contact details or an introduction."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Email address or name to search for"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results (default: 5)",
                    "default": DEFAULT_MAX_RESULTS
                }
            },
            "required": ["query"]
        })
    }

    fn plan(&self, item: &Item) -> Option<serde_json::Value> {
        let body = item.latest_body();
        if !ASKS_ABOUT_PEOPLE.as_ref()?.is_match(body) {
            return None;
        }
        let sender = normalize_address(&item.sender);
        let mentioned = EMAIL
            .as_ref()
            .and_then(|re| {
                re.find_iter(body)
                    .map(|m| normalize_address(m.as_str()))
                    .find(|addr| *addr != sender)
            })
            .unwrap_or(sender);
        Some(serde_json::json!({ "query": mentioned }))
    }

    async fn execute(&self, params: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let started = Instant::now();
        let query = require_str(&params, "query")?;
        let max_results = optional_count(&params, "max_results", DEFAULT_MAX_RESULTS, MAX_RESULTS);

        info!(query, "Looking up contact");
        let mut contacts = self.backend.search(query, max_results).await?;
        contacts.truncate(max_results);

        let mut source = "directory";
        if contacts.is_empty() && query.contains('@') {
            source = "address_parsed";
            contacts.push(ContactInfo {
                email: query.to_string(),
                name: name_from_address(query),
                ..ContactInfo::default()
            });
        }

        let summary = if contacts.is_empty() {
            format!("No contacts found matching: {query}")
        } else {
            let mut lines = vec![format!("Found {} contact(s):", contacts.len())];
            lines.extend(contacts.iter().map(|c| format!("  - {}", c.display())));
            lines.join("\n")
        };

        Ok(ToolOutput::success(
            serde_json::json!({
                "query": query,
                "source": source,
                "summary": summary,
                "contacts": contacts,
            }),
            started.elapsed(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::item;

    struct Directory(Vec<ContactInfo>);

    #[async_trait]
    impl ContactBackend for Directory {
        async fn search(&self, _query: &str, _max: usize) -> Result<Vec<ContactInfo>, ToolError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn names_from_addresses() {
        assert_eq!(name_from_address("john.doe@acme.com").as_deref(), Some("John Doe"));
        assert_eq!(name_from_address("mary_ann@acme.com").as_deref(), Some("Mary Ann"));
        assert_eq!(name_from_address("sam@acme.com").as_deref(), Some("Sam"));
        assert_eq!(name_from_address("j42@acme.com"), None);
    }

    #[test]
    fn plans_on_contact_requests_and_prefers_third_parties() {
        let tool = LookupContactTool::new(Arc::new(Directory(vec![])));
        let intro = item(
            "m1",
            "jane@acme.com",
            "Intro",
            "Could you put me in touch with Bob.Smith@Vendor.io?",
        );
        assert_eq!(tool.plan(&intro).unwrap()["query"], "bob.smith@vendor.io");

        let own = item("m2", "jane@acme.com", "Hi", "Do you have my phone number on file?");
        assert_eq!(tool.plan(&own).unwrap()["query"], "jane@acme.com");

        let plain = item("m3", "jane@acme.com", "Hi", "Thanks for lunch!");
        assert!(tool.plan(&plain).is_none());
    }

    #[tokio::test]
    async fn falls_back_to_parsed_name() {
        let tool = LookupContactTool::new(Arc::new(Directory(vec![])));
        let out = tool
            .execute(serde_json::json!({"query": "john.doe@acme.com"}))
            .await
            .unwrap();
        assert_eq!(out.result["source"], "address_parsed");
        assert_eq!(out.result["contacts"][0]["name"], "John Doe");
        assert_eq!(
            out.result["summary"],
            "Found 1 contact(s):\n  - John Doe - <john.doe@acme.com>"
        );
    }

    #[tokio::test]
    async fn reports_directory_hits() {
        let tool = LookupContactTool::new(Arc::new(Directory(vec![ContactInfo {
            email: "jane@acme.com".into(),
            name: Some("Jane Roe".into()),
            organization: Some("Acme".into()),
            job_title: Some("CFO".into()),
            ..ContactInfo::default()
        }])));
        let out = tool.execute(serde_json::json!({"query": "Jane"})).await.unwrap();
        assert_eq!(out.result["source"], "directory");
        assert!(out.result["summary"]
            .as_str()
            .unwrap()
            .contains("Jane Roe - CFO at Acme - <jane@acme.com>"));
    }

    #[test]
    fn parses_people_api_person() {
        let json = serde_json::json!({
            "results": [{"person": {
                "names": [{"displayName": "Jane Roe"}],
                "emailAddresses": [{"value": "jane@acme.com"}],
                "organizations": [{"name": "Acme", "title": "CFO"}]
            }}, {"person": {"names": [{"displayName": "No Email"}]}}]
        });
        let response: SearchResponse = serde_json::from_value(json).unwrap();
        let contacts: Vec<_> = response
            .results
            .into_iter()
            .filter_map(|r| r.person.into_contact())
            .collect();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].job_title.as_deref(), Some("CFO"));
    }
}
