//! Search conditions binding config elements to existing devices

use globset::Glob;
use serde_json::{Map, Value, json};

use super::size::SizeConfig;
use crate::devicegraph::Sid;

/// What to do when a search matches no device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IfNotFound {
    /// Drop the element silently
    Skip,

    /// Report an error issue, making the proposal fail
    Error,

    /// Create a new device instead (partitions only)
    Create,
}

impl IfNotFound {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::Error => "error",
            Self::Create => "create",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "skip" => Some(Self::Skip),
            "error" => Some(Self::Error),
            "create" => Some(Self::Create),
            _ => None,
        }
    }
}

/// Advanced search condition; every present field must hold
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchCondition {
    pub name: Option<String>,

    /// Glob on the device name, supporting `*` and `?`
    pub name_pattern: Option<String>,

    pub size: Option<SizeConfig>,

    pub partition_number: Option<u32>,
}

impl SearchCondition {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.name_pattern.is_none()
            && self.size.is_none()
            && self.partition_number.is_none()
    }

    fn matches(&self, candidate: &SearchCandidate<'_>) -> bool {
        if let Some(name) = &self.name
            && !same_device_name(name, candidate.name)
        {
            return false;
        }
        if let Some(pattern) = &self.name_pattern
            && !glob_match(pattern, candidate.name)
        {
            return false;
        }
        if let Some(size) = &self.size
            && !size.contains(candidate.size)
        {
            return false;
        }
        if let Some(number) = self.partition_number
            && candidate.partition_number != Some(number)
        {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchMatcher {
    /// `"*"`
    All,

    /// A plain device name, e.g. `"/dev/vda"`
    Name(String),

    Condition(SearchCondition),
}

/// Device as seen by a search
#[derive(Debug, Clone, Copy)]
pub struct SearchCandidate<'a> {
    pub name: &'a str,
    pub size: u64,
    pub partition_number: Option<u32>,
}

/// Where a search appears; decides the default not-found policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    Drive,
    Partition,
    MdRaid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Search {
    pub matcher: SearchMatcher,

    /// Explicit policy, `None` when the config relies on the default
    pub if_not_found: Option<IfNotFound>,

    /// Maximum number of devices a partition search expands to
    pub max: Option<usize>,

    /// Device the search was resolved to
    pub device: Option<Sid>,
}

impl Default for Search {
    fn default() -> Self {
        Self::all()
    }
}

impl Search {
    pub fn all() -> Self {
        Self {
            matcher: SearchMatcher::All,
            if_not_found: None,
            max: None,
            device: None,
        }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            matcher: SearchMatcher::Name(name.into()),
            ..Self::all()
        }
    }

    pub fn with_if_not_found(mut self, policy: IfNotFound) -> Self {
        self.if_not_found = Some(policy);
        self
    }

    /// Search bound to a known device
    pub fn resolved(sid: Sid) -> Self {
        Self {
            device: Some(sid),
            ..Self::all()
        }
    }

    /// Match-all searches have the lowest priority when claiming devices
    pub fn is_match_all(&self) -> bool {
        match &self.matcher {
            SearchMatcher::All => true,
            SearchMatcher::Name(_) => false,
            SearchMatcher::Condition(condition) => condition.is_empty(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.device.is_some()
    }

    pub fn effective_if_not_found(&self, scope: SearchScope) -> IfNotFound {
        let policy = self.if_not_found.unwrap_or(match scope {
            SearchScope::Partition if self.is_match_all() => IfNotFound::Skip,
            _ => IfNotFound::Error,
        });
        match (policy, scope) {
            (IfNotFound::Create, SearchScope::Drive) => IfNotFound::Error,
            (policy, _) => policy,
        }
    }

    pub fn matches(&self, candidate: &SearchCandidate<'_>) -> bool {
        match &self.matcher {
            SearchMatcher::All => true,
            SearchMatcher::Name(name) => same_device_name(name, candidate.name),
            SearchMatcher::Condition(condition) => condition.matches(candidate),
        }
    }

    /// Short description for issue messages
    pub fn describe(&self) -> String {
        match &self.matcher {
            SearchMatcher::All => "any device".to_string(),
            SearchMatcher::Name(name) => name.clone(),
            SearchMatcher::Condition(condition) => condition
                .name
                .clone()
                .or_else(|| condition.name_pattern.clone())
                .unwrap_or_else(|| "a device matching the condition".to_string()),
        }
    }

    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(text) if text == "*" => Some(Self::all()),
            Value::String(text) => Some(Self::by_name(text.clone())),
            Value::Object(map) => {
                let mut search = Self::all();
                for (key, value) in map {
                    match key.as_str() {
                        "condition" => {
                            if let Some(condition) = condition_from_json(value) {
                                search.matcher = SearchMatcher::Condition(condition);
                            }
                        }
                        "ifNotFound" => {
                            search.if_not_found = value.as_str().and_then(IfNotFound::parse);
                        }
                        "max" => {
                            search.max = value.as_u64().map(|max| max as usize);
                        }
                        _ => {}
                    }
                }
                Some(search)
            }
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        if self.if_not_found.is_none() && self.max.is_none() {
            match &self.matcher {
                SearchMatcher::All => return json!("*"),
                SearchMatcher::Name(name) => return json!(name),
                SearchMatcher::Condition(_) => {}
            }
        }

        let mut map = Map::new();
        match &self.matcher {
            SearchMatcher::All => {}
            SearchMatcher::Name(name) => {
                map.insert("condition".to_string(), json!({ "name": name }));
            }
            SearchMatcher::Condition(condition) => {
                map.insert("condition".to_string(), condition_to_json(condition));
            }
        }
        if let Some(policy) = self.if_not_found {
            map.insert("ifNotFound".to_string(), json!(policy.as_str()));
        }
        if let Some(max) = self.max {
            map.insert("max".to_string(), json!(max));
        }
        Value::Object(map)
    }
}

fn condition_from_json(value: &Value) -> Option<SearchCondition> {
    let map = value.as_object()?;
    let mut condition = SearchCondition::default();
    for (key, value) in map {
        match key.as_str() {
            "name" => condition.name = value.as_str().map(str::to_string),
            "namePattern" => {
                condition.name_pattern = value
                    .as_str()
                    .filter(|pattern| valid_pattern(pattern))
                    .map(str::to_string)
            }
            "size" => condition.size = SizeConfig::from_json(value),
            "partitionNumber" => {
                condition.partition_number = value.as_u64().map(|number| number as u32)
            }
            _ => {}
        }
    }
    Some(condition)
}

fn condition_to_json(condition: &SearchCondition) -> Value {
    let mut map = Map::new();
    if let Some(name) = &condition.name {
        map.insert("name".to_string(), json!(name));
    }
    if let Some(pattern) = &condition.name_pattern {
        map.insert("namePattern".to_string(), json!(pattern));
    }
    if let Some(size) = condition.size.as_ref().and_then(SizeConfig::to_json) {
        map.insert("size".to_string(), size);
    }
    if let Some(number) = condition.partition_number {
        map.insert("partitionNumber".to_string(), json!(number));
    }
    Value::Object(map)
}

/// Compares names with and without the "/dev/" prefix
fn same_device_name(wanted: &str, name: &str) -> bool {
    let strip = |n: &str| n.strip_prefix("/dev/").unwrap_or(n).to_string();
    strip(wanted) == strip(name)
}

/// Glob matching on device names; `*` also crosses `/`. An invalid
/// pattern matches nothing.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    Glob::new(pattern).is_ok_and(|glob| glob.compile_matcher().is_match(text))
}

fn valid_pattern(pattern: &str) -> bool {
    match Glob::new(pattern) {
        Ok(_) => true,
        Err(e) => {
            tracing::debug!("ignoring name pattern {pattern}: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::GIB;

    fn candidate(name: &str, size: u64) -> SearchCandidate<'_> {
        SearchCandidate {
            name,
            size,
            partition_number: None,
        }
    }

    #[test]
    fn glob_patterns() {
        assert!(glob_match("/dev/sd*", "/dev/sda"));
        assert!(glob_match("/dev/vd?", "/dev/vdb"));
        assert!(!glob_match("/dev/vd?", "/dev/vdb1"));
        assert!(glob_match("*nvme*p?", "/dev/nvme0n1p2"));
        assert!(!glob_match("/dev/sd*", "/dev/vda"));
        assert!(!glob_match("/dev/sd[", "/dev/sd["));
    }

    #[test]
    fn invalid_name_pattern_is_ignored() {
        let search = Search::from_json(&json!({
            "condition": { "namePattern": "/dev/sd[", "name": "/dev/sda" }
        }))
        .unwrap();
        let SearchMatcher::Condition(condition) = &search.matcher else {
            panic!("expected a condition, got {:?}", search.matcher);
        };
        assert_eq!(condition.name_pattern, None);
        assert_eq!(condition.name.as_deref(), Some("/dev/sda"));
        assert!(search.matches(&candidate("/dev/sda", GIB)));
    }

    #[test]
    fn names_match_with_or_without_prefix() {
        let search = Search::by_name("vda");
        assert!(search.matches(&candidate("/dev/vda", GIB)));
        assert!(!search.matches(&candidate("/dev/vdb", GIB)));
    }

    #[test]
    fn all_present_condition_keys_must_hold() {
        let search = Search::from_json(&json!({
            "condition": { "namePattern": "/dev/sd*", "size": { "min": "10 GiB" } }
        }))
        .unwrap();

        assert!(search.matches(&candidate("/dev/sda", 20 * GIB)));
        assert!(!search.matches(&candidate("/dev/sda", 5 * GIB)));
        assert!(!search.matches(&candidate("/dev/vda", 20 * GIB)));
    }

    #[test]
    fn default_policy_depends_on_scope() {
        let all = Search::all();
        assert_eq!(all.effective_if_not_found(SearchScope::Drive), IfNotFound::Error);
        assert_eq!(
            all.effective_if_not_found(SearchScope::Partition),
            IfNotFound::Skip
        );
        let named = Search::by_name("/dev/vda1");
        assert_eq!(
            named.effective_if_not_found(SearchScope::Partition),
            IfNotFound::Error
        );
        let create = Search::all().with_if_not_found(IfNotFound::Create);
        assert_eq!(
            create.effective_if_not_found(SearchScope::Drive),
            IfNotFound::Error
        );
    }

    #[test]
    fn simple_searches_are_exported_as_strings() {
        assert_eq!(Search::all().to_json(), json!("*"));
        assert_eq!(Search::by_name("/dev/vda").to_json(), json!("/dev/vda"));

        let raw = json!({ "condition": { "name": "/dev/vda" }, "ifNotFound": "skip" });
        assert_eq!(Search::from_json(&raw).unwrap().to_json(), raw);
    }

    #[test]
    fn unknown_policy_is_ignored() {
        let search = Search::from_json(&json!({ "ifNotFound": "explode" })).unwrap();
        assert_eq!(search.if_not_found, None);
    }
}
