//! Purpose: Parse topic strings into structured addresses.
//! Exports: `Address`, `resolve`.
//! Role: Sole syntactic gate for push-surface topics; existence is checked downstream.
//! Invariants: Service, resource and element id are lower-cased; the query is kept verbatim.
//! Invariants: An element id, when present, has UUID textual layout.
//! Invariants: A fragment needs its `#` and a query needs its `?`; the fragment is discarded.
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use super::error::{Error, ErrorKind};

static TOPIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^/(\w+)/(\w+)/",
        r"([0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})?",
        r"(?:#\w*)?",
        r"(?:\?([\w$=&():,;\-+]*))?$",
    ))
    .expect("topic grammar compiles")
});

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Address {
    pub service: String,
    pub resource: String,
    pub element_id: Option<String>,
    pub query: Option<String>,
}

impl Address {
    pub fn is_element(&self) -> bool {
        self.element_id.is_some()
    }

    /// Canonical path form, without fragment or query.
    pub fn path(&self) -> String {
        match &self.element_id {
            Some(id) => format!("/{}/{}/{id}", self.service, self.resource),
            None => format!("/{}/{}/", self.service, self.resource),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())?;
        if let Some(query) = &self.query {
            write!(f, "?{query}")?;
        }
        Ok(())
    }
}

pub fn resolve(topic: &str) -> Result<Address, Error> {
    let Some(captures) = TOPIC.captures(topic) else {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("event url malformed")
            .with_hint("Use /{service}/{resource}/ or /{service}/{resource}/{uuid}."));
    };
    let group = |index: usize| captures.get(index).map(|m| m.as_str());
    Ok(Address {
        service: group(1).unwrap_or_default().to_lowercase(),
        resource: group(2).unwrap_or_default().to_lowercase(),
        element_id: group(3).map(str::to_lowercase),
        query: group(4).filter(|query| !query.is_empty()).map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::{Address, resolve};
    use crate::core::error::ErrorKind;

    const ID: &str = "550e8400-e29b-41d4-a716-446655440000";

    #[test]
    fn resolves_resource_level_topic() {
        let address = resolve("/lights/bulbs/").expect("valid");
        assert_eq!(
            address,
            Address {
                service: "lights".to_string(),
                resource: "bulbs".to_string(),
                element_id: None,
                query: None,
            }
        );
        assert!(!address.is_element());
    }

    #[test]
    fn resolves_element_topic_with_fragment_and_query() {
        let topic = format!("/lights/bulbs/{ID}#state?$fields=brightness,color");
        let address = resolve(&topic).expect("valid");
        assert_eq!(address.element_id.as_deref(), Some(ID));
        assert_eq!(address.query.as_deref(), Some("$fields=brightness,color"));
        assert_eq!(address.path(), format!("/lights/bulbs/{ID}"));
    }

    #[test]
    fn letter_case_does_not_change_components() {
        let inputs = [
            format!("/lights/bulbs/{ID}"),
            format!("/Lights/BULBS/{}", ID.to_uppercase()),
            format!("/LIGHTS/Bulbs/{ID}"),
        ];
        let expected = resolve(&inputs[0]).expect("valid");
        for input in &inputs[1..] {
            assert_eq!(resolve(input).expect("valid"), expected, "input: {input}");
        }
    }

    #[test]
    fn empty_query_is_absent() {
        let address = resolve("/lights/bulbs/?").expect("valid");
        assert_eq!(address.query, None);
    }

    #[test]
    fn rejects_strings_outside_grammar() {
        let cases = [
            "",
            "/",
            "lights/bulbs/",
            "/lights/bulbs",
            "/lights//",
            "/lights/bulbs/not-a-uuid",
            "/lights/bulbs/550e8400-e29b-41d4-a716-44665544000",
            "/lights/bulbs/550e8400e29b41d4a716446655440000",
            "/light-s/bulbs/",
            "/lights/bulbs/?a b",
            "/lights/bulbs/extra/segment",
        ];
        for case in cases {
            let err = resolve(case).expect_err(case);
            assert_eq!(err.kind(), ErrorKind::Usage, "case: {case}");
        }
    }

    #[test]
    fn fragment_and_query_need_their_markers() {
        for case in ["/lights/bulbs/xyz", "/lights/bulbs/a=1", "/lights/bulbs/#x#y"] {
            let err = resolve(case).expect_err(case);
            assert_eq!(err.kind(), ErrorKind::Usage, "case: {case}");
        }

        let fragment_only = resolve("/lights/bulbs/#xyz").expect("fragment");
        assert!(!fragment_only.is_element());
        assert_eq!(fragment_only.query, None);

        let query_only = resolve("/lights/bulbs/?a=1").expect("query");
        assert_eq!(query_only.query.as_deref(), Some("a=1"));
    }

    #[test]
    fn display_renders_path_and_query() {
        let address = resolve("/Lights/Bulbs/?$limit=2").expect("valid");
        assert_eq!(address.to_string(), "/lights/bulbs/?$limit=2");
    }
}
