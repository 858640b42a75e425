//! Ordered header map with case-insensitive names.

/// Header fields in arrival order. Names compare case-insensitively and a
/// name may repeat.
///
/// # Examples
///
/// ```
/// use hitgate::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("X-RateLimit-Remaining", "5");
/// headers.set("x-ratelimit-remaining", "4");
///
/// assert_eq!(headers.get("X-RATELIMIT-REMAINING"), Some("4"));
/// assert_eq!(headers.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty header map with room for `capacity` fields.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    /// Appends a field, keeping earlier fields with the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// Replaces every field called `name` with a single field.
    ///
    /// The new field goes to the end, after any unrelated fields.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.fields.push((name, value.into()));
    }

    /// Returns the first value of `name`, or `None` if it is absent.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns every value of `name` in arrival order.
    ///
    /// # Examples
    ///
    /// ```
    /// use hitgate::http::Headers;
    ///
    /// let mut headers = Headers::new();
    /// headers.insert("Vary", "Origin");
    /// headers.insert("vary", "Accept");
    ///
    /// let values: Vec<_> = headers.get_all("VARY").collect();
    /// assert_eq!(values, ["Origin", "Accept"]);
    /// ```
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Drops every field called `name`; `true` if any existed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.fields.len();
        self.fields.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.fields.len() != before
    }

    /// Returns `true` if at least one field is called `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Number of fields, counting repeated names separately.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates over `(name, value)` pairs in arrival order. Names keep the
    /// case they were inserted with.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case() {
        let mut h = Headers::new();
        h.insert("Host", "example.com");
        assert_eq!(h.get("host"), Some("example.com"));
        assert_eq!(h.get("HOST"), Some("example.com"));
        assert!(h.contains("hOsT"));
        assert!(!h.contains("origin"));
    }

    #[test]
    fn insert_appends_and_set_replaces() {
        let mut h = Headers::new();
        h.insert("Vary", "Origin");
        h.insert("vary", "Accept");
        assert_eq!(h.get_all("VARY").collect::<Vec<_>>(), ["Origin", "Accept"]);

        h.set("Vary", "*");
        assert_eq!(h.get_all("vary").collect::<Vec<_>>(), ["*"]);
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn get_outlives_the_name_it_was_looked_up_with() {
        let mut h = Headers::new();
        h.insert("Host", "example.com");
        let value = {
            let name = String::from("host");
            h.get(&name)
        };
        assert_eq!(value, Some("example.com"));
    }

    #[test]
    fn remove_reports_whether_anything_went() {
        let mut h = Headers::new();
        h.insert("X-Trace", "1");
        assert!(h.remove("x-trace"));
        assert!(!h.remove("x-trace"));
        assert!(h.is_empty());
    }
}
