//! Dashboard data core: the persisted document schema, the migration engine that
//! upgrades stored JSON, the storage gateway, and the query and mutation layers
//! that views call into.
//! The in-memory `Document` is the single source of truth; every mutation goes
//! through `dashboard::Dashboard::mutate`, which persists the result.

pub mod core {
    use chrono::{DateTime, NaiveDate, Utc};
    use indexmap::IndexMap;
    use serde::{Deserialize, Serialize, Serializer};
    use serde_json::Value;
    use serde_with::{NoneAsEmptyString, serde_as};
    use std::{fmt, str::FromStr};
    use uuid::Uuid;

    /* ------------------------------- IDs ------------------------------- */

    macro_rules! string_id {
        ($(#[$meta:meta])* $name:ident) => {
            $(#[$meta])*
            #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(pub String);

            impl $name {
                pub fn as_str(&self) -> &str {
                    &self.0
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.0)
                }
            }

            impl From<&str> for $name {
                fn from(s: &str) -> Self {
                    Self(s.to_string())
                }
            }

            impl From<String> for $name {
                fn from(s: String) -> Self {
                    Self(s)
                }
            }
        };
    }

    string_id!(SectionId);
    string_id!(BookmarkId);
    string_id!(
        /// Also used as the `activeProjectId` lookup key.
        ProjectId
    );
    string_id!(TaskId);
    string_id!(TodoId);

    /// Time-based id token (`<prefix><unix millis>`). When the token is already
    /// `taken`, a short random suffix is appended until it is free.
    pub fn time_token(prefix: &str, taken: impl Fn(&str) -> bool) -> String {
        let base = format!("{prefix}{}", Utc::now().timestamp_millis());
        if !taken(&base) {
            return base;
        }
        loop {
            let suffix = Uuid::new_v4().simple().to_string();
            let candidate = format!("{base}_{}", &suffix[..6]);
            if !taken(&candidate) {
                return candidate;
            }
        }
    }

    /* ----------------------------- Statuses ----------------------------- */

    pub mod status {
        pub const PLANNING: &str = "Planning";
        pub const ACTIVE: &str = "Active";
        pub const ON_HOLD: &str = "On Hold";
        pub const COMPLETED: &str = "Completed";
        pub const ARCHIVED: &str = "Archived";
        pub const NOT_STARTED: &str = "Not Started";
        pub const IN_PROGRESS: &str = "In Progress";
        pub const REVIEW: &str = "Review";
        /// Legacy label; still counted as done.
        pub const DONE: &str = "Done";

        pub fn is_done(status: &str) -> bool {
            status == COMPLETED || status == DONE
        }

        /// Terminal statuses are never overdue.
        pub fn is_terminal(status: &str) -> bool {
            is_done(status) || status == ARCHIVED
        }
    }

    /* ----------------------------- Defaults ----------------------------- */

    pub const DEFAULT_FEEDS: [&str; 6] = [
        "https://news.ycombinator.com/rss",
        "https://krebsonsecurity.com/feed/",
        "https://feeds.feedburner.com/darknethackers",
        "https://threatpost.com/feed/",
        "https://www.infosecurity-magazine.com/rss/news/",
        "https://cisoseries.libsyn.com/rss",
    ];

    pub const DEFAULT_SUBREDDITS: [&str; 4] = ["cybersecurity", "netsec", "technology", "programming"];

    pub const DEFAULT_PROJECT_COLUMNS: [&str; 5] = [
        status::PLANNING,
        status::ACTIVE,
        status::ON_HOLD,
        status::COMPLETED,
        status::ARCHIVED,
    ];

    pub const DEFAULT_TASK_COLUMNS: [&str; 5] = [
        status::NOT_STARTED,
        status::ON_HOLD,
        status::IN_PROGRESS,
        status::REVIEW,
        status::COMPLETED,
    ];

    pub const PLACEHOLDER_PROJECT_ID: &str = "proj_default";
    pub const PLACEHOLDER_PROJECT_NAME: &str = "My Project";

    /// Replacement for any `javascript:` bookmark URL.
    pub const SAFE_URL_PLACEHOLDER: &str = "#";

    /// Largest accepted bookmark icon (a `data:image/...` URI), in bytes.
    pub const MAX_ICON_BYTES: usize = 500 * 1024;

    pub fn default_task_columns() -> Vec<String> {
        DEFAULT_TASK_COLUMNS.iter().map(|c| c.to_string()).collect()
    }

    pub fn default_project_columns() -> Vec<String> {
        DEFAULT_PROJECT_COLUMNS.iter().map(|c| c.to_string()).collect()
    }

    /* ------------------------------ URL safety ------------------------------ */

    /// True when `url` uses the `javascript:` scheme. Matching is
    /// case-insensitive and ignores leading whitespace and control characters,
    /// as well as tabs and newlines embedded in the scheme.
    pub fn is_script_url(url: &str) -> bool {
        let scheme: String = url
            .chars()
            .skip_while(|c| c.is_whitespace() || c.is_control())
            .filter(|c| !matches!(c, '\t' | '\n' | '\r'))
            .take("javascript:".len())
            .collect();
        scheme.eq_ignore_ascii_case("javascript:")
    }

    fn serialize_safe_url<S: Serializer>(url: &str, serializer: S) -> Result<S::Ok, S::Error> {
        if is_script_url(url) {
            serializer.serialize_str(SAFE_URL_PLACEHOLDER)
        } else {
            serializer.serialize_str(url)
        }
    }

    /* ------------------------------ Theme ------------------------------ */

    /// Theme name. Names this version does not know are kept verbatim.
    #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(from = "String", into = "String")]
    pub enum Theme {
        #[default]
        Dark,
        Light,
        Custom,
        Named(String),
    }

    impl Theme {
        pub fn as_str(&self) -> &str {
            match self {
                Theme::Dark => "dark",
                Theme::Light => "light",
                Theme::Custom => "custom",
                Theme::Named(name) => name,
            }
        }
    }

    impl From<String> for Theme {
        fn from(s: String) -> Self {
            match s.trim() {
                "" | "dark" => Theme::Dark,
                "light" => Theme::Light,
                "custom" => Theme::Custom,
                _ => Theme::Named(s),
            }
        }
    }

    impl From<Theme> for String {
        fn from(t: Theme) -> Self {
            t.as_str().to_string()
        }
    }

    impl fmt::Display for Theme {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    /// Colors applied when `theme == custom`. Always present in the document.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct CustomTheme {
        pub bg_primary: String,
        pub bg_secondary: String,
        pub bg_tertiary: String,
        pub text_primary: String,
        pub accent: String,
        #[serde(flatten)]
        pub extra: IndexMap<String, Value>,
    }

    impl Default for CustomTheme {
        fn default() -> Self {
            Self {
                bg_primary: "#1a1a2e".into(),
                bg_secondary: "#16213e".into(),
                bg_tertiary: "#0f1419".into(),
                text_primary: "#eaeaea".into(),
                accent: "#0ea5e9".into(),
                extra: IndexMap::new(),
            }
        }
    }

    /* ------------------------------ Entities ------------------------------ */

    /// A configured news feed.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct FeedSource {
        /// Feeds added by hand carry a `feed<millis>` id; default and legacy feeds have none.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub id: Option<String>,
        /// Never empty.
        pub url: String,
        pub name: String,
        #[serde(flatten)]
        pub extra: IndexMap<String, Value>,
    }

    impl FeedSource {
        pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
            Self {
                id: None,
                url: url.into(),
                name: name.into(),
                extra: IndexMap::new(),
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Section {
        pub id: SectionId,
        pub name: String,
        #[serde(default)]
        pub bookmarks: Vec<Bookmark>,
        #[serde(flatten)]
        pub extra: IndexMap<String, Value>,
    }

    impl Section {
        pub fn new(id: impl Into<SectionId>, name: impl Into<String>) -> Self {
            Self {
                id: id.into(),
                name: name.into(),
                bookmarks: vec![],
                extra: IndexMap::new(),
            }
        }
    }

    #[serde_as]
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Bookmark {
        pub id: BookmarkId,
        pub name: String,
        /// Never serialized with a `javascript:` scheme.
        #[serde(serialize_with = "serialize_safe_url")]
        pub url: String,
        #[serde(default)]
        pub notes: String,
        #[serde(default)]
        pub tags: Vec<String>,
        /// `data:image/...` URI; written as `""` when absent.
        #[serde_as(as = "NoneAsEmptyString")]
        #[serde(default)]
        pub icon: Option<String>,
        #[serde(flatten)]
        pub extra: IndexMap<String, Value>,
    }

    impl Bookmark {
        pub fn new(id: impl Into<BookmarkId>, name: impl Into<String>, url: impl Into<String>) -> Self {
            Self {
                id: id.into(),
                name: name.into(),
                url: url.into(),
                notes: String::new(),
                tags: vec![],
                icon: None,
                extra: IndexMap::new(),
            }
        }
    }

    #[serde_as]
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Project {
        pub id: ProjectId,
        pub name: String,
        #[serde(default)]
        pub description: String,
        #[serde(default)]
        pub notes: String,
        /// Member of `Document::project_columns`.
        pub status: String,
        /// Omitted when absent; an unreadable stored value then lives in `extra`.
        #[serde_as(as = "NoneAsEmptyString")]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub due_date: Option<NaiveDate>,
        #[serde_as(as = "NoneAsEmptyString")]
        #[serde(default)]
        pub folder_path: Option<String>,
        #[serde(default)]
        pub tags: Vec<String>,
        /// Task board columns; every task status is one of these.
        pub columns: Vec<String>,
        #[serde(default)]
        pub tasks: Vec<Task>,
        #[serde(flatten)]
        pub extra: IndexMap<String, Value>,
    }

    impl Project {
        pub fn new(id: impl Into<ProjectId>, name: impl Into<String>) -> Self {
            Self {
                id: id.into(),
                name: name.into(),
                description: String::new(),
                notes: String::new(),
                status: status::ACTIVE.to_string(),
                due_date: None,
                folder_path: None,
                tags: vec![],
                columns: default_task_columns(),
                tasks: vec![],
                extra: IndexMap::new(),
            }
        }

        /// The project created when a document has none.
        pub fn placeholder() -> Self {
            Self::new(PLACEHOLDER_PROJECT_ID, PLACEHOLDER_PROJECT_NAME)
        }

        pub fn task(&self, id: &TaskId) -> Option<&Task> {
            self.tasks.iter().find(|t| &t.id == id)
        }

        pub fn task_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
            self.tasks.iter_mut().find(|t| &t.id == id)
        }

        pub fn has_column(&self, column: &str) -> bool {
            self.columns.iter().any(|c| c == column)
        }

        /// Status given to new tasks: the second column when there is one
        /// (the first is usually a backlog), else the first.
        pub fn default_task_status(&self) -> String {
            self.columns
                .get(1)
                .or_else(|| self.columns.first())
                .cloned()
                .unwrap_or_else(|| status::NOT_STARTED.to_string())
        }
    }

    #[serde_as]
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Task {
        pub id: TaskId,
        pub title: String,
        #[serde(default)]
        pub notes: String,
        pub status: String,
        #[serde(default)]
        pub priority: Priority,
        /// Omitted when absent; an unreadable stored value then lives in `extra`.
        #[serde_as(as = "NoneAsEmptyString")]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub due_date: Option<NaiveDate>,
        /// Comma-separated tag list, kept as typed by the user.
        #[serde(default)]
        pub tags: String,
        #[serde_as(as = "NoneAsEmptyString")]
        #[serde(default)]
        pub folder_path: Option<String>,
        #[serde(default)]
        pub todos: Vec<Todo>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub created_at: Option<DateTime<Utc>>,
        #[serde(flatten)]
        pub extra: IndexMap<String, Value>,
    }

    impl Task {
        pub fn new(id: impl Into<TaskId>, title: impl Into<String>, status: impl Into<String>) -> Self {
            Self {
                id: id.into(),
                title: title.into(),
                notes: String::new(),
                status: status.into(),
                priority: Priority::default(),
                due_date: None,
                tags: String::new(),
                folder_path: None,
                todos: vec![],
                created_at: None,
                extra: IndexMap::new(),
            }
        }

        /// Individual tags from the comma-separated `tags` field.
        pub fn tag_list(&self) -> impl Iterator<Item = &str> {
            self.tags.split(',').map(str::trim).filter(|t| !t.is_empty())
        }

        pub fn todo_mut(&mut self, id: &TodoId) -> Option<&mut Todo> {
            self.todos.iter_mut().find(|t| &t.id == id)
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Todo {
        pub id: TodoId,
        pub text: String,
        #[serde(default)]
        pub done: bool,
        #[serde(flatten)]
        pub extra: IndexMap<String, Value>,
    }

    impl Todo {
        pub fn new(id: impl Into<TodoId>, text: impl Into<String>) -> Self {
            Self {
                id: id.into(),
                text: text.into(),
                done: false,
                extra: IndexMap::new(),
            }
        }
    }

    /* ------------------------------ Priority ------------------------------ */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum Priority {
        Low,
        #[default]
        Medium,
        High,
        Critical,
    }

    impl Priority {
        /// Sort rank: low 1, medium 2, high 3, critical 4.
        pub fn rank(self) -> u8 {
            match self {
                Priority::Low => 1,
                Priority::Medium => 2,
                Priority::High => 3,
                Priority::Critical => 4,
            }
        }

        pub fn as_str(self) -> &'static str {
            match self {
                Priority::Low => "low",
                Priority::Medium => "medium",
                Priority::High => "high",
                Priority::Critical => "critical",
            }
        }
    }

    impl fmt::Display for Priority {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    #[error("unknown priority {0:?} (expected low, medium, high or critical)")]
    pub struct ParsePriorityError(pub String);

    impl FromStr for Priority {
        type Err = ParsePriorityError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s.trim().to_ascii_lowercase().as_str() {
                "low" => Ok(Priority::Low),
                "medium" => Ok(Priority::Medium),
                "high" => Ok(Priority::High),
                "critical" => Ok(Priority::Critical),
                _ => Err(ParsePriorityError(s.to_string())),
            }
        }
    }

    /* ------------------------------ Aggregate ------------------------------ */

    /// Aggregate root: the whole persisted dashboard.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Document {
        #[serde(default)]
        pub sections: Vec<Section>,
        #[serde(default)]
        pub theme: Theme,
        #[serde(default)]
        pub custom_theme: CustomTheme,
        #[serde(default)]
        pub news_feeds: Vec<FeedSource>,
        #[serde(default)]
        pub reddit_subs: Vec<String>,
        /// Board columns for projects; always contains `Completed` and `Archived`.
        #[serde(default)]
        pub project_columns: Vec<String>,
        /// Never empty.
        #[serde(default)]
        pub projects: Vec<Project>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub active_project_id: Option<ProjectId>,
        #[serde(flatten)]
        pub extra: IndexMap<String, Value>,
    }

    impl Default for Document {
        /// Empty dashboard: no sections, default feeds and subreddits, one placeholder project.
        fn default() -> Self {
            Self {
                sections: vec![],
                theme: Theme::Dark,
                custom_theme: CustomTheme::default(),
                news_feeds: DEFAULT_FEEDS
                    .iter()
                    .map(|url| FeedSource::new(*url, crate::migrate::feed_name_from_url(url)))
                    .collect(),
                reddit_subs: DEFAULT_SUBREDDITS.iter().map(|s| s.to_string()).collect(),
                project_columns: default_project_columns(),
                projects: vec![Project::placeholder()],
                active_project_id: Some(PLACEHOLDER_PROJECT_ID.into()),
                extra: IndexMap::new(),
            }
        }
    }

    impl Document {
        /// First-run document: the default plus a couple of starter sections.
        pub fn starter() -> Self {
            let mut work = Section::new("work", "Work");
            work.bookmarks = vec![
                Bookmark::new("bm1", "Gmail", "https://gmail.com"),
                Bookmark::new("bm2", "GitHub", "https://github.com"),
            ];
            let mut personal = Section::new("personal", "Personal");
            personal.bookmarks = vec![Bookmark::new("bm3", "YouTube", "https://youtube.com")];
            Self {
                sections: vec![work, personal],
                ..Self::default()
            }
        }

        pub fn section(&self, id: &SectionId) -> Option<&Section> {
            self.sections.iter().find(|s| &s.id == id)
        }

        pub fn section_mut(&mut self, id: &SectionId) -> Option<&mut Section> {
            self.sections.iter_mut().find(|s| &s.id == id)
        }

        pub fn project(&self, id: &ProjectId) -> Option<&Project> {
            self.projects.iter().find(|p| &p.id == id)
        }

        pub fn project_mut(&mut self, id: &ProjectId) -> Option<&mut Project> {
            self.projects.iter_mut().find(|p| &p.id == id)
        }

        /// The project named by `active_project_id`, else the first project.
        pub fn active_project(&self) -> Option<&Project> {
            self.active_project_id
                .as_ref()
                .and_then(|id| self.project(id))
                .or_else(|| self.projects.first())
        }

        /// Section and position of a bookmark.
        pub fn find_bookmark(&self, id: &BookmarkId) -> Option<(usize, usize)> {
            self.sections.iter().enumerate().find_map(|(si, s)| {
                s.bookmarks.iter().position(|b| &b.id == id).map(|bi| (si, bi))
            })
        }

        pub fn bookmarks(&self) -> impl Iterator<Item = &Bookmark> {
            self.sections.iter().flat_map(|s| s.bookmarks.iter())
        }

        pub fn tasks(&self) -> impl Iterator<Item = (&Project, &Task)> {
            self.projects
                .iter()
                .flat_map(|p| p.tasks.iter().map(move |t| (p, t)))
        }

        pub fn has_project_column(&self, column: &str) -> bool {
            self.project_columns.iter().any(|c| c == column)
        }
    }

}

pub mod migrate {
    //! Migration engine: turns any stored or imported JSON object into a current `Document`.
    //!
    //! Runs in two phases:
    //! - *shape*: lenient raw types accept every historical layout (string feeds,
    //!   comma-string bookmark tags, list task tags, ISO datetimes, wrong-typed
    //!   fields) and convert into the typed document;
    //! - *normalize*: repairs on the typed document (status renames, column
    //!   membership, ids, URL sanitization, active project).
    //!
    //! Both phases are total for objects and idempotent; only a non-object root is rejected.

    use crate::core::*;
    use chrono::{DateTime, NaiveDate, Utc};
    use indexmap::{IndexMap, IndexSet};
    use nom::{
        IResult,
        bytes::complete::{is_not, tag, take_while1},
        character::complete::char,
        combinator::opt,
        error::VerboseError,
        sequence::{preceded, terminated, tuple},
    };
    use serde::{Deserialize, de::DeserializeOwned};
    use serde_json::Value;
    use serde_with::{DefaultOnError, VecSkipError, serde_as};
    use std::collections::HashSet;
    use tracing::{debug, warn};

    /* ------------------------------ Errors ------------------------------ */

    #[derive(Debug, thiserror::Error)]
    pub enum MigrateError {
        #[error("dashboard data must be a JSON object, found {found}")]
        NotAnObject { found: &'static str },
    }

    /// What a migration run changed. Clean once a document is current.
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct MigrationReport {
        /// Feeds stored as bare URL strings.
        pub legacy_feeds: usize,
        /// Columns and statuses rewritten through the legacy rename table.
        pub renamed_statuses: usize,
        /// Column lists that were de-duplicated, filled or extended.
        pub repaired_columns: usize,
        /// Blank statuses filled in; statuses appended to their column lists.
        pub repaired_statuses: usize,
        pub assigned_ids: usize,
        pub sanitized_urls: usize,
        /// Malformed list elements and empty feeds.
        pub dropped_entries: usize,
        /// Legacy task `files` lists.
        pub dropped_files: usize,
        /// Missing fields replaced by their defaults.
        pub filled_defaults: usize,
        /// Tag and subreddit lists rewritten into their current form.
        pub normalized_lists: usize,
        /// Dates converted into their current form; unknown priorities reset to medium.
        pub repaired_fields: usize,
        pub placeholder_project: bool,
        pub repaired_active_project: bool,
    }

    impl MigrationReport {
        pub fn is_clean(&self) -> bool {
            *self == Self::default()
        }
    }

    /* ---------------------------- Entry points ---------------------------- */

    /// Upgrade raw dashboard JSON into a current document.
    pub fn migrate(input: Value) -> Result<Document, MigrateError> {
        migrate_with_report(input).map(|(doc, _)| doc)
    }

    pub fn migrate_with_report(input: Value) -> Result<(Document, MigrationReport), MigrateError> {
        if !input.is_object() {
            return Err(MigrateError::NotAnObject {
                found: json_kind(&input),
            });
        }
        let raw = RawDocument::deserialize(&input).unwrap_or_else(|err| {
            warn!(%err, "unreadable dashboard layout; keeping fields verbatim");
            let extra = match input {
                Value::Object(map) => map.into_iter().collect(),
                _ => IndexMap::new(),
            };
            RawDocument {
                extra,
                ..RawDocument::default()
            }
        });

        let mut report = MigrationReport::default();
        let mut doc = raw.into_current(&mut report);
        normalize(&mut doc, &mut report);
        if !report.is_clean() {
            debug!(?report, "migrated dashboard data");
        }
        Ok((doc, report))
    }

    /// Re-run the engine on a typed document.
    pub fn migrate_document(mut doc: Document) -> Document {
        let mut report = MigrationReport::default();
        normalize(&mut doc, &mut report);
        doc
    }

    /// Rewrite every `javascript:` bookmark URL to the safe placeholder.
    /// Returns how many were rewritten.
    pub fn sanitize_urls(doc: &mut Document) -> usize {
        let mut rewritten = 0;
        for bookmark in doc.sections.iter_mut().flat_map(|s| s.bookmarks.iter_mut()) {
            if is_script_url(&bookmark.url) {
                bookmark.url = SAFE_URL_PLACEHOLDER.to_string();
                rewritten += 1;
            }
        }
        rewritten
    }

    /// Legacy status rename table.
    pub fn rename_legacy_status(status: &str) -> Option<&'static str> {
        match status {
            "Done" => Some(status::COMPLETED),
            "Backlog" => Some(status::ON_HOLD),
            "To Do" => Some(status::NOT_STARTED),
            _ => None,
        }
    }

    /// Canonical subreddit name: trimmed, lowercase, without `r/` or `/r/`.
    pub fn normalize_subreddit(name: &str) -> String {
        let mut s = name.trim().to_lowercase();
        while let Some(rest) = s.strip_prefix("/r/").or_else(|| s.strip_prefix("r/")) {
            s = rest.trim().to_string();
        }
        s.trim_end_matches('/').trim().to_string()
    }

    fn json_kind(v: &Value) -> &'static str {
        match v {
            Value::Null => "null",
            Value::Bool(_) => "a boolean",
            Value::Number(_) => "a number",
            Value::String(_) => "a string",
            Value::Array(_) => "an array",
            Value::Object(_) => "an object",
        }
    }

    /* ------------------------------ Feed names ------------------------------ */

    const FALLBACK_FEED_NAME: &str = "Feed";

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    fn is_scheme_char(c: char) -> bool {
        c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')
    }

    fn is_host_char(c: char) -> bool {
        c.is_alphanumeric() || matches!(c, '-' | '.' | '_')
    }

    /// `scheme://[userinfo@]host...` → host.
    fn url_host(i: &str) -> PResult<'_, &str> {
        preceded(
            tuple((
                terminated(take_while1(is_scheme_char), tag("://")),
                opt(terminated(is_not("@/?#"), char('@'))),
            )),
            take_while1(is_host_char),
        )(i)
    }

    /// Display name for a feed: first hostname label without `www.`, capitalized.
    /// Falls back to `"Feed"` for anything that is not an absolute URL.
    pub fn feed_name_from_url(url: &str) -> String {
        let host = match url_host(url.trim()) {
            Ok((_, host)) => host.to_ascii_lowercase(),
            Err(_) => return FALLBACK_FEED_NAME.to_string(),
        };
        let host = host.strip_prefix("www.").unwrap_or(host.as_str());
        let label = host.split('.').next().unwrap_or_default();
        let mut chars = label.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => FALLBACK_FEED_NAME.to_string(),
        }
    }

    /* ---------------------------- Raw (wire) shapes ---------------------------- */

    /// Id or text that older exports may have written as a number.
    #[derive(Debug, Clone, Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Text(String),
        Number(serde_json::Number),
        Flag(bool),
    }

    impl Scalar {
        fn into_string(self) -> String {
            match self {
                Scalar::Text(s) => s,
                Scalar::Number(n) => n.to_string(),
                Scalar::Flag(b) => b.to_string(),
            }
        }
    }

    /// Tags were written both as a list and as a comma-separated string.
    #[derive(Debug, Clone, Deserialize)]
    #[serde(untagged)]
    enum RawTags {
        Text(String),
        List(Vec<Value>),
    }

    impl RawTags {
        fn into_list(self, report: &mut MigrationReport) -> Vec<String> {
            match self {
                RawTags::List(items) => items
                    .into_iter()
                    .filter_map(|v| match v {
                        Value::String(s) => Some(s),
                        Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .collect(),
                RawTags::Text(s) => {
                    report.normalized_lists += 1;
                    s.split(',').map(|t| t.to_string()).collect()
                }
            }
        }

        fn into_text(self, report: &mut MigrationReport) -> String {
            match self {
                RawTags::Text(s) => s,
                RawTags::List(items) => {
                    let list = RawTags::List(items).into_list(report);
                    report.normalized_lists += 1;
                    list.iter()
                        .map(|t| t.trim())
                        .filter(|t| !t.is_empty())
                        .collect::<Vec<_>>()
                        .join(", ")
                }
            }
        }
    }

    /// Deserialize each element on its own; malformed ones are dropped with a warning.
    fn elements<T: DeserializeOwned>(
        items: Vec<Value>,
        what: &'static str,
        report: &mut MigrationReport,
    ) -> Vec<T> {
        items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<T>(item) {
                Ok(v) => Some(v),
                Err(err) => {
                    warn!(%err, "dropping malformed {what}");
                    report.dropped_entries += 1;
                    None
                }
            })
            .collect()
    }

    fn non_blank(s: Option<String>) -> Option<String> {
        s.filter(|v| !v.trim().is_empty())
    }

    #[serde_as]
    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    struct RawDocument {
        #[serde_as(as = "DefaultOnError")]
        sections: Option<Vec<Value>>,
        #[serde_as(as = "DefaultOnError")]
        theme: Option<String>,
        #[serde_as(as = "DefaultOnError")]
        custom_theme: Option<RawCustomTheme>,
        #[serde_as(as = "DefaultOnError")]
        news_feeds: Option<Vec<Value>>,
        #[serde_as(as = "DefaultOnError<Option<VecSkipError<_>>>")]
        reddit_subs: Option<Vec<String>>,
        #[serde_as(as = "DefaultOnError<Option<VecSkipError<_>>>")]
        project_columns: Option<Vec<String>>,
        #[serde_as(as = "DefaultOnError")]
        projects: Option<Vec<Value>>,
        #[serde_as(as = "DefaultOnError")]
        active_project_id: Option<Scalar>,
        #[serde(flatten)]
        extra: IndexMap<String, Value>,
    }

    #[serde_as]
    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    struct RawCustomTheme {
        #[serde_as(as = "DefaultOnError")]
        bg_primary: Option<String>,
        #[serde_as(as = "DefaultOnError")]
        bg_secondary: Option<String>,
        #[serde_as(as = "DefaultOnError")]
        bg_tertiary: Option<String>,
        #[serde_as(as = "DefaultOnError")]
        text_primary: Option<String>,
        #[serde_as(as = "DefaultOnError")]
        accent: Option<String>,
        #[serde(flatten)]
        extra: IndexMap<String, Value>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(untagged)]
    enum RawFeed {
        Legacy(String),
        Source(RawFeedSource),
    }

    #[serde_as]
    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    struct RawFeedSource {
        #[serde_as(as = "DefaultOnError")]
        id: Option<Scalar>,
        #[serde_as(as = "DefaultOnError")]
        url: Option<String>,
        #[serde_as(as = "DefaultOnError")]
        name: Option<String>,
        #[serde(flatten)]
        extra: IndexMap<String, Value>,
    }

    #[serde_as]
    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    struct RawSection {
        #[serde_as(as = "DefaultOnError")]
        id: Option<Scalar>,
        #[serde_as(as = "DefaultOnError")]
        name: Option<String>,
        #[serde_as(as = "DefaultOnError")]
        bookmarks: Option<Vec<Value>>,
        #[serde(flatten)]
        extra: IndexMap<String, Value>,
    }

    #[serde_as]
    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    struct RawBookmark {
        #[serde_as(as = "DefaultOnError")]
        id: Option<Scalar>,
        #[serde_as(as = "DefaultOnError")]
        name: Option<String>,
        #[serde_as(as = "DefaultOnError")]
        url: Option<String>,
        #[serde_as(as = "DefaultOnError")]
        notes: Option<String>,
        #[serde_as(as = "DefaultOnError")]
        tags: Option<RawTags>,
        #[serde_as(as = "DefaultOnError")]
        icon: Option<String>,
        #[serde(flatten)]
        extra: IndexMap<String, Value>,
    }

    #[serde_as]
    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    struct RawProject {
        #[serde_as(as = "DefaultOnError")]
        id: Option<Scalar>,
        #[serde_as(as = "DefaultOnError")]
        name: Option<String>,
        #[serde_as(as = "DefaultOnError")]
        description: Option<String>,
        #[serde_as(as = "DefaultOnError")]
        notes: Option<String>,
        #[serde_as(as = "DefaultOnError")]
        status: Option<String>,
        /// Any JSON; values that are not a date are kept verbatim.
        due_date: Option<Value>,
        #[serde_as(as = "DefaultOnError")]
        folder_path: Option<String>,
        #[serde_as(as = "DefaultOnError")]
        tags: Option<RawTags>,
        #[serde_as(as = "DefaultOnError<Option<VecSkipError<_>>>")]
        columns: Option<Vec<String>>,
        #[serde_as(as = "DefaultOnError")]
        tasks: Option<Vec<Value>>,
        #[serde(flatten)]
        extra: IndexMap<String, Value>,
    }

    #[serde_as]
    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    struct RawTask {
        #[serde_as(as = "DefaultOnError")]
        id: Option<Scalar>,
        #[serde_as(as = "DefaultOnError")]
        title: Option<String>,
        #[serde_as(as = "DefaultOnError")]
        notes: Option<String>,
        #[serde_as(as = "DefaultOnError")]
        status: Option<String>,
        #[serde_as(as = "DefaultOnError")]
        priority: Option<String>,
        due_date: Option<Value>,
        #[serde_as(as = "DefaultOnError")]
        tags: Option<RawTags>,
        #[serde_as(as = "DefaultOnError")]
        folder_path: Option<String>,
        #[serde_as(as = "DefaultOnError")]
        todos: Option<Vec<Value>>,
        /// RFC 3339 text, a bare date, or epoch milliseconds.
        created_at: Option<Value>,
        #[serde(flatten)]
        extra: IndexMap<String, Value>,
    }

    #[serde_as]
    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    struct RawTodo {
        #[serde_as(as = "DefaultOnError")]
        id: Option<Scalar>,
        #[serde_as(as = "DefaultOnError")]
        text: Option<String>,
        #[serde_as(as = "DefaultOnError")]
        done: Option<bool>,
        #[serde(flatten)]
        extra: IndexMap<String, Value>,
    }

    /* ---------------------------- Shape phase ---------------------------- */

    fn id_of(id: Option<Scalar>) -> String {
        id.map(Scalar::into_string).unwrap_or_default()
    }

    fn is_blank(value: &Value) -> bool {
        match value {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    fn from_epoch_millis(value: &Value) -> Option<DateTime<Utc>> {
        value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f as i64))
            .and_then(DateTime::from_timestamp_millis)
    }

    /// A field value the shape phase cannot convert stays in `extra` under its wire key.
    fn keep_verbatim(extra: &mut IndexMap<String, Value>, key: &str, value: Value) {
        warn!(key, %value, "keeping unreadable value verbatim");
        extra.insert(key.to_string(), value);
    }

    fn parse_date(
        raw: Option<Value>,
        key: &str,
        extra: &mut IndexMap<String, Value>,
        report: &mut MigrationReport,
    ) -> Option<NaiveDate> {
        let value = raw.filter(|v| !is_blank(v))?;
        if let Some(d) = value
            .as_str()
            .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
        {
            return Some(d);
        }
        let converted = match &value {
            Value::String(s) => {
                let s = s.trim();
                DateTime::parse_from_rfc3339(s)
                    .map(|dt| dt.date_naive())
                    .ok()
                    .or_else(|| {
                        s.get(..10)
                            .and_then(|head| NaiveDate::parse_from_str(head, "%Y-%m-%d").ok())
                    })
            }
            other => from_epoch_millis(other).map(|dt| dt.date_naive()),
        };
        match converted {
            Some(d) => {
                report.repaired_fields += 1;
                Some(d)
            }
            None => {
                keep_verbatim(extra, key, value);
                None
            }
        }
    }

    fn parse_created_at(
        raw: Option<Value>,
        extra: &mut IndexMap<String, Value>,
        report: &mut MigrationReport,
    ) -> Option<DateTime<Utc>> {
        let value = raw.filter(|v| !is_blank(v))?;
        if let Some(dt) = value
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
        {
            return Some(dt.with_timezone(&Utc));
        }
        let converted = match &value {
            Value::String(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc()),
            other => from_epoch_millis(other),
        };
        match converted {
            Some(dt) => {
                report.repaired_fields += 1;
                Some(dt)
            }
            None => {
                keep_verbatim(extra, "createdAt", value);
                None
            }
        }
    }

    fn parse_priority(raw: Option<String>, report: &mut MigrationReport) -> Priority {
        match raw.as_deref().map(str::trim) {
            None | Some("") => Priority::default(),
            Some(p) => p.parse().unwrap_or_else(|err| {
                warn!(%err, "unknown task priority; using medium");
                report.repaired_fields += 1;
                Priority::default()
            }),
        }
    }

    impl RawDocument {
        fn into_current(self, report: &mut MigrationReport) -> Document {
            let sections = elements::<RawSection>(self.sections.unwrap_or_default(), "section", report)
                .into_iter()
                .map(|s| s.into_current(report))
                .collect();

            let custom_theme = match self.custom_theme {
                Some(raw) => raw.into_current(report),
                None => {
                    report.filled_defaults += 1;
                    CustomTheme::default()
                }
            };

            let news_feeds = match self.news_feeds {
                Some(items) => elements::<RawFeed>(items, "news feed", report)
                    .into_iter()
                    .map(|feed| match feed {
                        RawFeed::Legacy(url) => {
                            report.legacy_feeds += 1;
                            FeedSource::new(url.clone(), feed_name_from_url(&url))
                        }
                        RawFeed::Source(raw) => FeedSource {
                            id: raw.id.map(Scalar::into_string),
                            url: raw.url.unwrap_or_default(),
                            name: raw.name.unwrap_or_default(),
                            extra: raw.extra,
                        },
                    })
                    .collect(),
                None => {
                    report.filled_defaults += 1;
                    Document::default().news_feeds
                }
            };
            if report.legacy_feeds > 0 {
                debug!(count = report.legacy_feeds, "converted legacy string feeds");
            }

            let reddit_subs = self.reddit_subs.unwrap_or_else(|| {
                report.filled_defaults += 1;
                DEFAULT_SUBREDDITS.iter().map(|s| s.to_string()).collect()
            });

            let project_columns = match self.project_columns {
                Some(cols) if !cols.is_empty() => cols,
                _ => {
                    report.filled_defaults += 1;
                    default_project_columns()
                }
            };

            let projects = elements::<RawProject>(self.projects.unwrap_or_default(), "project", report)
                .into_iter()
                .map(|p| p.into_current(report))
                .collect();

            Document {
                sections,
                theme: self.theme.map(Theme::from).unwrap_or_default(),
                custom_theme,
                news_feeds,
                reddit_subs,
                project_columns,
                projects,
                active_project_id: self
                    .active_project_id
                    .map(Scalar::into_string)
                    .filter(|id| !id.trim().is_empty())
                    .map(ProjectId::from),
                extra: self.extra,
            }
        }
    }

    impl RawCustomTheme {
        fn into_current(self, report: &mut MigrationReport) -> CustomTheme {
            let defaults = CustomTheme::default();
            let mut pick = |value: Option<String>, fallback: String| match non_blank(value) {
                Some(v) => v,
                None => {
                    report.filled_defaults += 1;
                    fallback
                }
            };
            CustomTheme {
                bg_primary: pick(self.bg_primary, defaults.bg_primary),
                bg_secondary: pick(self.bg_secondary, defaults.bg_secondary),
                bg_tertiary: pick(self.bg_tertiary, defaults.bg_tertiary),
                text_primary: pick(self.text_primary, defaults.text_primary),
                accent: pick(self.accent, defaults.accent),
                extra: self.extra,
            }
        }
    }

    impl RawSection {
        fn into_current(self, report: &mut MigrationReport) -> Section {
            let bookmarks = elements::<RawBookmark>(self.bookmarks.unwrap_or_default(), "bookmark", report)
                .into_iter()
                .map(|b| b.into_current(report))
                .collect();
            Section {
                id: id_of(self.id).into(),
                name: self.name.unwrap_or_default(),
                bookmarks,
                extra: self.extra,
            }
        }
    }

    impl RawBookmark {
        fn into_current(self, report: &mut MigrationReport) -> Bookmark {
            let url = non_blank(self.url).unwrap_or_else(|| {
                report.filled_defaults += 1;
                SAFE_URL_PLACEHOLDER.to_string()
            });
            let tags = match self.tags {
                Some(tags) => tags.into_list(report),
                None => {
                    report.filled_defaults += 1;
                    vec![]
                }
            };
            Bookmark {
                id: id_of(self.id).into(),
                name: self.name.unwrap_or_default(),
                url,
                notes: self.notes.unwrap_or_default(),
                tags,
                icon: non_blank(self.icon),
                extra: self.extra,
            }
        }
    }

    impl RawProject {
        fn into_current(self, report: &mut MigrationReport) -> Project {
            let columns = match self.columns {
                Some(cols) => cols,
                None => {
                    report.filled_defaults += 1;
                    default_task_columns()
                }
            };
            let tasks = elements::<RawTask>(self.tasks.unwrap_or_default(), "task", report)
                .into_iter()
                .map(|t| t.into_current(report))
                .collect();
            let mut extra = self.extra;
            let due_date = parse_date(self.due_date, "dueDate", &mut extra, report);
            Project {
                id: id_of(self.id).into(),
                name: self.name.unwrap_or_default(),
                description: self.description.unwrap_or_default(),
                notes: self.notes.unwrap_or_default(),
                status: self.status.unwrap_or_default(),
                due_date,
                folder_path: non_blank(self.folder_path),
                tags: self.tags.map(|t| t.into_list(report)).unwrap_or_default(),
                columns,
                tasks,
                extra,
            }
        }
    }

    impl RawTask {
        fn into_current(self, report: &mut MigrationReport) -> Task {
            let todos = elements::<RawTodo>(self.todos.unwrap_or_default(), "todo", report)
                .into_iter()
                .map(|t| Todo {
                    id: id_of(t.id).into(),
                    text: t.text.unwrap_or_default(),
                    done: t.done.unwrap_or_default(),
                    extra: t.extra,
                })
                .collect();
            let mut extra = self.extra;
            let due_date = parse_date(self.due_date, "dueDate", &mut extra, report);
            let created_at = parse_created_at(self.created_at, &mut extra, report);
            Task {
                id: id_of(self.id).into(),
                title: self.title.unwrap_or_default(),
                notes: self.notes.unwrap_or_default(),
                status: self.status.unwrap_or_default(),
                priority: parse_priority(self.priority, report),
                due_date,
                tags: self.tags.map(|t| t.into_text(report)).unwrap_or_default(),
                folder_path: non_blank(self.folder_path),
                todos,
                created_at,
                extra,
            }
        }
    }

    /* ---------------------------- Normalize phase ---------------------------- */

    /// Hands out unique ids within one scope. Blank ids get `<kind>-<n>`;
    /// repeated ids get `-2`, `-3`, ... suffixes.
    struct Ids {
        kind: &'static str,
        seen: HashSet<String>,
    }

    impl Ids {
        fn new(kind: &'static str) -> Self {
            Self {
                kind,
                seen: HashSet::new(),
            }
        }

        fn claim(&mut self, id: &mut String, position: usize, report: &mut MigrationReport) {
            let trimmed = id.trim();
            let base = if trimmed.is_empty() {
                format!("{}-{}", self.kind, position + 1)
            } else {
                trimmed.to_string()
            };
            let mut candidate = base.clone();
            let mut n = 1;
            while self.seen.contains(&candidate) {
                n += 1;
                candidate = format!("{base}-{n}");
            }
            if *id != candidate {
                *id = candidate.clone();
                report.assigned_ids += 1;
            }
            self.seen.insert(candidate);
        }
    }

    /// Trimmed, non-empty strings; first occurrence wins.
    fn dedupe(list: &mut Vec<String>) -> bool {
        let cleaned: IndexSet<String> = list
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        let cleaned: Vec<String> = cleaned.into_iter().collect();
        let changed = cleaned != *list;
        *list = cleaned;
        changed
    }

    fn normalize(doc: &mut Document, report: &mut MigrationReport) {
        normalize_sections(doc, report);
        normalize_feeds(&mut doc.news_feeds, report);
        normalize_subreddits(&mut doc.reddit_subs, report);
        normalize_project_columns(&mut doc.project_columns, report);
        normalize_projects(doc, report);
        repair_active_project(doc, report);
    }

    fn normalize_sections(doc: &mut Document, report: &mut MigrationReport) {
        let sanitized = sanitize_urls(doc);
        if sanitized > 0 {
            warn!(count = sanitized, "rewrote javascript: bookmark URLs");
            report.sanitized_urls += sanitized;
        }

        let mut section_ids = Ids::new("section");
        let mut bookmark_ids = Ids::new("bookmark");
        let mut position = 0;
        for (si, section) in doc.sections.iter_mut().enumerate() {
            section_ids.claim(&mut section.id.0, si, report);
            for bookmark in &mut section.bookmarks {
                bookmark_ids.claim(&mut bookmark.id.0, position, report);
                position += 1;
                if dedupe(&mut bookmark.tags) {
                    report.normalized_lists += 1;
                }
                if bookmark.icon.as_deref().is_some_and(|i| i.trim().is_empty()) {
                    bookmark.icon = None;
                }
            }
        }
    }

    fn normalize_feeds(feeds: &mut Vec<FeedSource>, report: &mut MigrationReport) {
        let before = feeds.len();
        feeds.retain_mut(|feed| {
            let trimmed = feed.url.trim();
            if trimmed.len() != feed.url.len() {
                feed.url = trimmed.to_string();
            }
            !feed.url.is_empty()
        });
        if feeds.len() < before {
            debug!(count = before - feeds.len(), "dropped feeds without a url");
            report.dropped_entries += before - feeds.len();
        }
        for feed in feeds.iter_mut().filter(|f| f.name.trim().is_empty()) {
            feed.name = feed_name_from_url(&feed.url);
            report.filled_defaults += 1;
        }
    }

    fn normalize_subreddits(subs: &mut Vec<String>, report: &mut MigrationReport) {
        let mut cleaned: Vec<String> = subs.iter().map(|s| normalize_subreddit(s)).collect();
        dedupe(&mut cleaned);
        if cleaned != *subs {
            debug!(before = ?subs, after = ?cleaned, "normalized subreddit names");
            report.normalized_lists += 1;
            *subs = cleaned;
        }
    }

    fn normalize_project_columns(columns: &mut Vec<String>, report: &mut MigrationReport) {
        let before = columns.clone();
        dedupe(columns);
        if columns.is_empty() {
            *columns = default_project_columns();
        }
        if !columns.iter().any(|c| c == status::COMPLETED) {
            match columns.iter().position(|c| c == status::ARCHIVED) {
                Some(at) => columns.insert(at, status::COMPLETED.to_string()),
                None => columns.push(status::COMPLETED.to_string()),
            }
        }
        if !columns.iter().any(|c| c == status::ARCHIVED) {
            columns.push(status::ARCHIVED.to_string());
        }
        if *columns != before {
            debug!(?before, after = ?columns, "repaired project columns");
            report.repaired_columns += 1;
        }
    }

    fn rename_in_place(value: &mut String, report: &mut MigrationReport) {
        let trimmed = value.trim();
        if trimmed.len() != value.len() {
            *value = trimmed.to_string();
            report.repaired_statuses += 1;
        }
        if let Some(renamed) = rename_legacy_status(value) {
            *value = renamed.to_string();
            report.renamed_statuses += 1;
        }
    }

    fn normalize_projects(doc: &mut Document, report: &mut MigrationReport) {
        if doc.projects.is_empty() {
            debug!("no projects; adding placeholder project");
            doc.projects.push(Project::placeholder());
            report.placeholder_project = true;
        }

        let Document {
            projects,
            project_columns,
            ..
        } = doc;
        let mut project_ids = Ids::new("project");
        let mut task_ids = Ids::new("task");
        let mut task_position = 0;

        for (pi, project) in projects.iter_mut().enumerate() {
            project_ids.claim(&mut project.id.0, pi, report);

            for column in &mut project.columns {
                rename_in_place(column, report);
            }
            if dedupe(&mut project.columns) {
                report.repaired_columns += 1;
            }
            if project.columns.is_empty() {
                project.columns = default_task_columns();
                report.repaired_columns += 1;
            }

            rename_in_place(&mut project.status, report);
            if project.status.trim().is_empty() {
                project.status = status::ACTIVE.to_string();
                report.repaired_statuses += 1;
            }
            if !project_columns.contains(&project.status) {
                project_columns.push(project.status.clone());
                report.repaired_statuses += 1;
            }

            if dedupe(&mut project.tags) {
                report.normalized_lists += 1;
            }
            if project.folder_path.as_deref().is_some_and(|p| p.trim().is_empty()) {
                project.folder_path = None;
            }

            for task in &mut project.tasks {
                task_ids.claim(&mut task.id.0, task_position, report);
                task_position += 1;

                rename_in_place(&mut task.status, report);
                if task.status.trim().is_empty() {
                    task.status = project.columns[0].clone();
                    report.repaired_statuses += 1;
                }
                if !project.columns.contains(&task.status) {
                    project.columns.push(task.status.clone());
                    report.repaired_statuses += 1;
                }
                if task.extra.shift_remove("files").is_some() {
                    report.dropped_files += 1;
                }
                if task.folder_path.as_deref().is_some_and(|p| p.trim().is_empty()) {
                    task.folder_path = None;
                }

                let mut todo_ids = Ids::new("todo");
                for (ti, todo) in task.todos.iter_mut().enumerate() {
                    todo_ids.claim(&mut todo.id.0, ti, report);
                }
            }
        }

        if report.renamed_statuses > 0 {
            debug!(count = report.renamed_statuses, "renamed legacy statuses");
        }
        if report.assigned_ids > 0 {
            debug!(count = report.assigned_ids, "assigned missing or duplicate ids");
        }
    }

    fn repair_active_project(doc: &mut Document, report: &mut MigrationReport) {
        let valid = doc
            .active_project_id
            .as_ref()
            .is_some_and(|id| doc.project(id).is_some());
        if !valid {
            let repaired = doc.projects.first().map(|p| p.id.clone());
            debug!(from = ?doc.active_project_id, to = ?repaired, "repaired active project");
            doc.active_project_id = repaired;
            report.repaired_active_project = true;
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use pretty_assertions::assert_eq;
        use proptest::prelude::*;
        use serde_json::json;

        #[test]
        fn empty_object_becomes_default_document() {
            assert_eq!(migrate(json!({})).unwrap(), Document::default());
        }

        #[test]
        fn non_objects_are_rejected() {
            for v in [json!(null), json!([1, 2]), json!("x"), json!(3)] {
                assert!(matches!(migrate(v), Err(MigrateError::NotAnObject { .. })));
            }
        }

        #[test]
        fn legacy_string_feed_gets_a_derived_name() {
            let doc = migrate(json!({ "newsFeeds": ["https://www.krebsonsecurity.com/feed/"] })).unwrap();
            assert_eq!(
                doc.news_feeds,
                vec![FeedSource::new("https://www.krebsonsecurity.com/feed/", "Krebsonsecurity")]
            );
        }

        #[test]
        fn feed_names_follow_the_hostname() {
            assert_eq!(feed_name_from_url("https://news.ycombinator.com/rss"), "News");
            assert_eq!(feed_name_from_url("http://user@WWW.Example.org:8080/x"), "Example");
            assert_eq!(feed_name_from_url("www.example.org/feed"), "Feed");
            assert_eq!(feed_name_from_url(""), "Feed");
        }

        #[test]
        fn legacy_statuses_are_renamed_everywhere() {
            let doc = migrate(json!({
                "projects": [{
                    "id": "p1",
                    "name": "Site",
                    "status": "Done",
                    "columns": ["To Do", "Backlog", "Doing", "Done"],
                    "tasks": [
                        { "id": "t1", "title": "a", "status": "To Do" },
                        { "id": "t2", "title": "b", "status": "Backlog" },
                        { "id": "t3", "title": "c", "status": "Done" }
                    ]
                }]
            }))
            .unwrap();
            let p = &doc.projects[0];
            assert_eq!(p.columns, vec!["Not Started", "On Hold", "Doing", "Completed"]);
            let statuses: Vec<_> = p.tasks.iter().map(|t| t.status.as_str()).collect();
            assert_eq!(statuses, vec!["Not Started", "On Hold", "Completed"]);
            assert_eq!(p.status, "Completed");
            assert_eq!(doc.active_project_id, Some(ProjectId::from("p1")));
        }

        #[test]
        fn project_columns_gain_completed_and_archived() {
            let doc = migrate(json!({ "projectColumns": ["Planning", "Active", "Archived"] })).unwrap();
            assert_eq!(doc.project_columns, vec!["Planning", "Active", "Completed", "Archived"]);
            let doc = migrate(json!({ "projectColumns": ["Idea", "Idea"] })).unwrap();
            assert_eq!(doc.project_columns, vec!["Idea", "Completed", "Archived"]);
        }

        #[test]
        fn bookmarks_are_sanitized_and_tags_normalized() {
            let doc = migrate(json!({
                "sections": [{
                    "id": "s",
                    "name": "S",
                    "bookmarks": [
                        { "id": "b1", "name": "evil", "url": "  JavaScript:alert(1)" },
                        { "id": "b2", "name": "ok", "url": "https://ok.io", "tags": "work, home ,work" },
                        { "id": "b3", "name": "no url", "icon": "" },
                        42
                    ]
                }]
            }))
            .unwrap();
            let b = &doc.sections[0].bookmarks;
            assert_eq!(b.len(), 3);
            assert_eq!(b[0].url, "#");
            assert!(b[0].tags.is_empty());
            assert_eq!(b[1].tags, vec!["work", "home"]);
            assert_eq!(b[2].url, "#");
            assert_eq!(b[2].icon, None);
        }

        #[test]
        fn tasks_drop_files_and_keep_unknown_fields() {
            let (doc, report) = migrate_with_report(json!({
                "projects": [{
                    "id": "p",
                    "name": "P",
                    "columns": ["Not Started", "Completed"],
                    "pinned": true,
                    "tasks": [{
                        "id": "t",
                        "title": "T",
                        "status": "Blocked",
                        "priority": "HIGH",
                        "tags": ["x", " y "],
                        "dueDate": "2024-05-01T10:00:00Z",
                        "createdAt": "2024-04-01T08:30:00.000Z",
                        "files": ["a.pdf"],
                        "estimate": 3
                    }]
                }],
                "layout": { "compact": true }
            }))
            .unwrap();
            let p = &doc.projects[0];
            let t = &p.tasks[0];
            assert_eq!(report.dropped_files, 1);
            assert!(!t.extra.contains_key("files"));
            assert_eq!(t.extra.get("estimate"), Some(&json!(3)));
            assert_eq!(p.extra.get("pinned"), Some(&json!(true)));
            assert_eq!(doc.extra.get("layout"), Some(&json!({ "compact": true })));
            assert_eq!(t.tags, "x, y");
            assert_eq!(t.priority, Priority::High);
            assert_eq!(t.due_date, NaiveDate::from_ymd_opt(2024, 5, 1));
            assert!(t.created_at.is_some());
            assert_eq!(p.columns, vec!["Not Started", "Completed", "Blocked"]);
            // project status was missing entirely
            assert_eq!(p.status, "Active");
        }

        #[test]
        fn wrong_typed_fields_fall_back_to_defaults() {
            let doc = migrate(json!({
                "sections": "oops",
                "theme": 7,
                "customTheme": { "accent": "#ff0000", "bgPrimary": 3 },
                "redditSubs": ["r/NetSec", " /r/netsec ", 9, ""],
                "projects": [5, { "name": "Real", "columns": "nope", "tasks": {} }],
                "activeProjectId": "missing"
            }))
            .unwrap();
            assert!(doc.sections.is_empty());
            assert_eq!(doc.theme, Theme::Dark);
            assert_eq!(doc.custom_theme.accent, "#ff0000");
            assert_eq!(doc.custom_theme.bg_primary, CustomTheme::default().bg_primary);
            assert_eq!(doc.reddit_subs, vec!["netsec"]);
            assert_eq!(doc.projects.len(), 1);
            assert_eq!(doc.projects[0].id.as_str(), "project-1");
            assert_eq!(doc.projects[0].columns, default_task_columns());
            assert_eq!(doc.active_project_id, Some(ProjectId::from("project-1")));
        }

        #[test]
        fn epoch_millis_creation_times_are_converted() {
            let (doc, report) = migrate_with_report(json!({
                "projects": [{ "id": "p", "name": "P", "tasks": [
                    { "id": "a", "title": "a", "createdAt": 1_700_000_000_000_i64, "dueDate": 1_714_521_600_000_i64 },
                    { "id": "b", "title": "b", "createdAt": "2024-04-02" }
                ]}]
            }))
            .unwrap();
            let tasks = &doc.projects[0].tasks;
            assert_eq!(tasks[0].created_at, DateTime::from_timestamp_millis(1_700_000_000_000));
            assert_eq!(tasks[0].due_date, NaiveDate::from_ymd_opt(2024, 5, 1));
            assert_eq!(
                tasks[1].created_at.map(|dt| dt.date_naive()),
                NaiveDate::from_ymd_opt(2024, 4, 2)
            );
            assert!(tasks.iter().all(|t| t.extra.is_empty()));
            assert_eq!(report.repaired_fields, 3);
        }

        #[test]
        fn unreadable_dates_are_kept_verbatim() {
            let (doc, _) = migrate_with_report(json!({
                "projects": [{
                    "id": "p",
                    "name": "P",
                    "dueDate": "05/01/2024",
                    "tasks": [{ "id": "t", "title": "t", "createdAt": { "seconds": 12 }, "dueDate": true }]
                }]
            }))
            .unwrap();
            let p = &doc.projects[0];
            let t = &p.tasks[0];
            assert_eq!(p.due_date, None);
            assert_eq!(p.extra.get("dueDate"), Some(&json!("05/01/2024")));
            assert_eq!(t.created_at, None);
            assert_eq!(t.extra.get("createdAt"), Some(&json!({ "seconds": 12 })));
            assert_eq!(t.extra.get("dueDate"), Some(&json!(true)));

            let stored = serde_json::to_value(&doc).unwrap();
            assert_eq!(stored["projects"][0]["dueDate"], json!("05/01/2024"));
            assert_eq!(stored["projects"][0]["tasks"][0]["createdAt"], json!({ "seconds": 12 }));

            let (again, report) = migrate_with_report(stored).unwrap();
            assert_eq!(again, doc);
            assert!(report.is_clean(), "{report:?}");
        }

        #[test]
        fn bookmark_ids_are_unique_across_sections() {
            let doc = migrate(json!({
                "sections": [
                    { "id": "a", "name": "A", "bookmarks": [{ "id": "x", "name": "1", "url": "https://a" }] },
                    { "id": "b", "name": "B", "bookmarks": [{ "id": "x", "name": "2", "url": "https://b" }] }
                ]
            }))
            .unwrap();
            let ids: Vec<_> = doc.bookmarks().map(|b| b.id.as_str()).collect();
            assert_eq!(ids, vec!["x", "x-2"]);
            assert_eq!(doc.find_bookmark(&BookmarkId::from("x")), Some((0, 0)));
            assert_eq!(doc.find_bookmark(&BookmarkId::from("x-2")), Some((1, 0)));
        }

        #[test]
        fn blank_and_duplicate_ids_are_repaired() {
            let doc = migrate(json!({
                "sections": [
                    { "name": "A", "bookmarks": [{ "id": "x", "name": "1", "url": "https://a" }] },
                    { "id": "section-1", "name": "B", "bookmarks": [{ "id": "x", "name": "2", "url": "https://b" }] }
                ],
                "projects": [
                    { "id": 7, "name": "P", "tasks": [{ "id": "t", "title": "a", "todos": [{ "text": "one" }, { "text": "two" }] }] },
                    { "id": "7", "name": "Q", "tasks": [{ "id": "t", "title": "b" }] }
                ]
            }))
            .unwrap();
            assert_eq!(doc.sections[0].id.as_str(), "section-1");
            assert_eq!(doc.sections[1].id.as_str(), "section-1-2");
            assert_eq!(doc.sections[1].bookmarks[0].id.as_str(), "x-2");
            assert_eq!(doc.projects[0].id.as_str(), "7");
            assert_eq!(doc.projects[1].id.as_str(), "7-2");
            assert_eq!(doc.projects[1].tasks[0].id.as_str(), "t-2");
            let todo_ids: Vec<_> = doc.projects[0].tasks[0].todos.iter().map(|t| t.id.as_str()).collect();
            assert_eq!(todo_ids, vec!["todo-1", "todo-2"]);
        }

        #[test]
        fn empty_projects_get_the_placeholder() {
            let doc = migrate(json!({ "projects": [], "activeProjectId": "gone" })).unwrap();
            assert_eq!(doc.projects, vec![Project::placeholder()]);
            assert_eq!(doc.active_project_id, Some(ProjectId::from(PLACEHOLDER_PROJECT_ID)));
        }

        #[test]
        fn migrate_document_matches_value_migration() {
            let mut doc = Document::default();
            doc.projects[0].columns = vec!["Done".into()];
            doc.projects[0].tasks.push(Task::new("", "t", "Done"));
            let typed = migrate_document(doc.clone());
            let via_json = migrate(serde_json::to_value(&doc).unwrap()).unwrap();
            assert_eq!(typed, via_json);
            assert_eq!(typed.projects[0].columns, vec!["Completed"]);
            assert_eq!(typed.projects[0].tasks[0].id.as_str(), "task-1");
        }

        /* ------------------------------ Properties ------------------------------ */

        fn any_status() -> impl Strategy<Value = Value> {
            prop_oneof![
                Just(json!("Done")),
                Just(json!("Backlog")),
                Just(json!("To Do")),
                Just(json!("In Progress")),
                Just(json!("Custom")),
                Just(json!("")),
                Just(Value::Null),
                Just(json!(3)),
            ]
        }

        fn any_url() -> impl Strategy<Value = Value> {
            prop_oneof![
                Just(json!("https://a.io")),
                Just(json!("javascript:alert(1)")),
                Just(json!(" JAVASCRIPT:x")),
                Just(json!("java\nscript:x")),
                Just(json!("")),
                Just(Value::Null),
            ]
        }

        fn any_id() -> impl Strategy<Value = Value> {
            prop_oneof![
                Just(json!("")),
                Just(json!("a")),
                Just(json!("dup")),
                Just(json!(" dup ")),
                Just(json!(7)),
                Just(Value::Null),
            ]
        }

        fn any_tags() -> impl Strategy<Value = Value> {
            prop_oneof![
                Just(json!("x, y ,x")),
                Just(json!(["a", " a", "b", 1])),
                Just(json!([])),
                Just(Value::Null),
                Just(json!(false)),
            ]
        }

        fn any_date() -> impl Strategy<Value = Value> {
            prop_oneof![
                Just(json!("2024-05-01")),
                Just(json!("2024-05-01T23:00:00-03:00")),
                Just(json!("not a date")),
                Just(json!("")),
            ]
        }

        fn any_bookmark() -> impl Strategy<Value = Value> {
            (any_id(), any_url(), any_tags()).prop_map(|(id, url, tags)| {
                json!({ "id": id, "name": "n", "url": url, "tags": tags, "icon": "" })
            })
        }

        fn any_section() -> impl Strategy<Value = Value> {
            (any_id(), prop::collection::vec(any_bookmark(), 0..4))
                .prop_map(|(id, bookmarks)| json!({ "id": id, "name": "s", "bookmarks": bookmarks }))
        }

        fn any_task() -> impl Strategy<Value = Value> {
            (any_id(), any_status(), any_tags(), any_date(), any::<bool>()).prop_map(
                |(id, status, tags, due, with_files)| {
                    let mut t = json!({
                        "id": id, "title": "t", "status": status, "tags": tags, "dueDate": due,
                        "todos": [{ "text": "x" }, { "id": "k", "text": "y", "done": true }]
                    });
                    if with_files {
                        t["files"] = json!(["a.txt"]);
                    }
                    t
                },
            )
        }

        fn any_project() -> impl Strategy<Value = Value> {
            (
                any_id(),
                any_status(),
                prop::collection::vec(any_status(), 0..4),
                prop::collection::vec(any_task(), 0..4),
            )
                .prop_map(|(id, status, columns, tasks)| {
                    json!({ "id": id, "name": "p", "status": status, "columns": columns, "tasks": tasks })
                })
        }

        fn any_document() -> impl Strategy<Value = Value> {
            (
                prop::collection::vec(any_section(), 0..3),
                prop::collection::vec(any_project(), 0..3),
                prop_oneof![
                    Just(Value::Null),
                    Just(json!(["https://www.krebsonsecurity.com/feed/", "", { "url": " https://x.io " }])),
                ],
                prop_oneof![Just(Value::Null), Just(json!(["r/Netsec", "netsec", " "]))],
                prop_oneof![Just(Value::Null), Just(json!(["Done", "Idea", "Idea"]))],
                any_id(),
            )
                .prop_map(|(sections, projects, feeds, subs, columns, active)| {
                    json!({
                        "sections": sections,
                        "projects": projects,
                        "newsFeeds": feeds,
                        "redditSubs": subs,
                        "projectColumns": columns,
                        "activeProjectId": active,
                        "theme": "light"
                    })
                })
        }

        proptest! {
            #[test]
            fn migration_is_idempotent(input in any_document()) {
                let once = migrate(input).unwrap();
                let (twice, report) = migrate_with_report(serde_json::to_value(&once).unwrap()).unwrap();
                prop_assert_eq!(&once, &twice);
                prop_assert!(report.is_clean(), "second run changed {:?}", report);
                prop_assert_eq!(migrate_document(once.clone()), once);
            }

            #[test]
            fn migrated_documents_are_complete(input in any_document()) {
                let doc = migrate(input).unwrap();
                prop_assert!(!doc.projects.is_empty());
                prop_assert!(doc.active_project().is_some());
                prop_assert!(doc.active_project_id.as_ref().is_some_and(|id| doc.project(id).is_some()));
                prop_assert!(doc.has_project_column(status::COMPLETED));
                prop_assert!(doc.has_project_column(status::ARCHIVED));
                let mut task_ids = HashSet::new();
                for p in &doc.projects {
                    prop_assert!(doc.has_project_column(&p.status));
                    for t in &p.tasks {
                        prop_assert!(p.has_column(&t.status));
                        prop_assert!(rename_legacy_status(&t.status).is_none());
                        prop_assert!(task_ids.insert(t.id.clone()));
                        prop_assert!(!t.extra.contains_key("files"));
                    }
                }
                let mut bookmark_ids = HashSet::new();
                for b in doc.bookmarks() {
                    prop_assert!(bookmark_ids.insert(b.id.clone()));
                }
                prop_assert!(doc.news_feeds.iter().all(|f| !f.url.is_empty() && !f.name.is_empty()));
            }

            #[test]
            fn no_script_url_survives(input in any_document()) {
                let doc = migrate(input).unwrap();
                prop_assert!(doc.bookmarks().all(|b| !is_script_url(&b.url)));
                let text = serde_json::to_string(&doc).unwrap().to_lowercase();
                prop_assert!(!text.contains("javascript:"));
            }
        }
    }
}

pub mod storage {
    //! Persistence gateway: one JSON document under a fixed key of a
    //! size-bounded key-value store.

    use crate::core::Document;
    use crate::migrate::{self, MigrateError};
    use indexmap::IndexMap;
    use std::{
        fs, io,
        path::{Path, PathBuf},
    };
    use tracing::{debug, info, warn};

    /// Key the whole dashboard is stored under.
    pub const STORAGE_KEY: &str = "dashboardData";

    /// Same order of magnitude as browser local storage.
    pub const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

    /* ------------------------------ Errors ------------------------------ */

    #[derive(Debug, thiserror::Error)]
    pub enum StoreError {
        #[error("storage quota exceeded: {needed} bytes needed, {capacity} allowed")]
        QuotaExceeded { needed: usize, capacity: usize },
        #[error("storage i/o failed")]
        Io(#[from] io::Error),
        #[error("storage unavailable: {0}")]
        Unavailable(String),
    }

    /// Stored or imported text that cannot become a document.
    #[derive(Debug, thiserror::Error)]
    pub enum CorruptData {
        #[error("not valid JSON")]
        Json(#[from] serde_json::Error),
        #[error(transparent)]
        Shape(#[from] MigrateError),
    }

    #[derive(Debug, thiserror::Error)]
    pub enum LoadError {
        #[error("stored dashboard data is corrupt")]
        Corrupt(#[from] CorruptData),
        #[error("could not read dashboard data")]
        Store(#[from] StoreError),
    }

    #[derive(Debug, thiserror::Error)]
    pub enum SaveError {
        #[error(
            "storage quota exceeded ({bytes} bytes, limit {capacity}); export your data as a backup, \
             then remove old bookmarks or projects and compress or remove large icons"
        )]
        Quota { bytes: usize, capacity: usize },
        #[error("failed to save dashboard data")]
        Other(#[source] Box<dyn std::error::Error + Send + Sync>),
    }

    /* ------------------------------ Backends ------------------------------ */

    /// String key-value backend (browser local storage, files, memory).
    pub trait KeyValueStore {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
        fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
        fn remove(&mut self, key: &str) -> Result<(), StoreError>;
    }

    /// In-memory store with an optional byte capacity over all keys and values.
    #[derive(Debug, Clone, Default)]
    pub struct MemoryStore {
        entries: IndexMap<String, String>,
        capacity: Option<usize>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_capacity_bytes(capacity: usize) -> Self {
            Self {
                entries: IndexMap::new(),
                capacity: Some(capacity),
            }
        }

        pub fn set_capacity_bytes(&mut self, capacity: Option<usize>) {
            self.capacity = capacity;
        }

        pub fn used_bytes(&self) -> usize {
            self.entries.iter().map(|(k, v)| k.len() + v.len()).sum()
        }
    }

    impl KeyValueStore for MemoryStore {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            Ok(self.entries.get(key).cloned())
        }

        fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
            if let Some(capacity) = self.capacity {
                let others: usize = self
                    .entries
                    .iter()
                    .filter(|(k, _)| k.as_str() != key)
                    .map(|(k, v)| k.len() + v.len())
                    .sum();
                let needed = others + key.len() + value.len();
                if needed > capacity {
                    return Err(StoreError::QuotaExceeded { needed, capacity });
                }
            }
            self.entries.insert(key.to_string(), value.to_string());
            Ok(())
        }

        fn remove(&mut self, key: &str) -> Result<(), StoreError> {
            self.entries.shift_remove(key);
            Ok(())
        }
    }

    /// One `<key>.json` file per key inside `dir`. Writes go to a temporary
    /// file that is renamed over the target.
    #[derive(Debug, Clone)]
    pub struct FileStore {
        dir: PathBuf,
        quota: Option<usize>,
    }

    impl FileStore {
        pub fn new(dir: impl Into<PathBuf>) -> Self {
            Self {
                dir: dir.into(),
                quota: Some(DEFAULT_QUOTA_BYTES),
            }
        }

        /// `None` disables the quota.
        pub fn with_quota(mut self, quota: Option<usize>) -> Self {
            self.quota = quota;
            self
        }

        pub fn dir(&self) -> &Path {
            &self.dir
        }

        pub fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
            let valid = !key.is_empty()
                && key
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'));
            if !valid {
                return Err(StoreError::Unavailable(format!("invalid storage key {key:?}")));
            }
            Ok(self.dir.join(format!("{key}.json")))
        }

        fn used_bytes_except(&self, target: &Path) -> Result<usize, StoreError> {
            let entries = match fs::read_dir(&self.dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
                Err(e) => return Err(e.into()),
            };
            let mut used = 0;
            for entry in entries {
                let path = entry?.path();
                if path == target || path.extension().is_none_or(|ext| ext != "json") {
                    continue;
                }
                used += fs::metadata(&path)?.len() as usize;
            }
            Ok(used)
        }
    }

    impl KeyValueStore for FileStore {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            match fs::read_to_string(self.path_for(key)?) {
                Ok(text) => Ok(Some(text)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        }

        fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
            let path = self.path_for(key)?;
            if let Some(capacity) = self.quota {
                let needed = self.used_bytes_except(&path)? + value.len();
                if needed > capacity {
                    return Err(StoreError::QuotaExceeded { needed, capacity });
                }
            }
            fs::create_dir_all(&self.dir)?;
            let tmp = self.dir.join(format!(".{key}.json.tmp"));
            fs::write(&tmp, value)?;
            fs::rename(&tmp, &path)?;
            Ok(())
        }

        fn remove(&mut self, key: &str) -> Result<(), StoreError> {
            match fs::remove_file(self.path_for(key)?) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        }
    }

    /* ------------------------------ Gateway ------------------------------ */

    /// Parse stored or imported dashboard JSON and migrate it to the current schema.
    pub fn parse_document(text: &str) -> Result<Document, CorruptData> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        Ok(migrate::migrate(value)?)
    }

    /// Loads and saves the dashboard under `STORAGE_KEY`. Never holds the document.
    #[derive(Debug)]
    pub struct Gateway<S> {
        store: S,
    }

    impl<S: KeyValueStore> Gateway<S> {
        pub fn new(store: S) -> Self {
            Self { store }
        }

        pub fn store(&self) -> &S {
            &self.store
        }

        pub fn store_mut(&mut self) -> &mut S {
            &mut self.store
        }

        pub fn into_inner(self) -> S {
            self.store
        }

        /// Stored document, migrated. On first run the starter document is
        /// persisted right away; failing to do so is logged, not fatal.
        pub fn load(&mut self) -> Result<Document, LoadError> {
            match self.store.get(STORAGE_KEY)? {
                Some(text) => {
                    let doc = parse_document(&text)?;
                    debug!(bytes = text.len(), "loaded dashboard data");
                    Ok(doc)
                }
                None => {
                    info!("no stored dashboard data; starting with defaults");
                    let doc = Document::starter();
                    if let Err(err) = self.save(&doc) {
                        warn!(error = ?err, "could not persist first-run defaults");
                    }
                    Ok(doc)
                }
            }
        }

        pub fn save(&mut self, doc: &Document) -> Result<(), SaveError> {
            let text = serde_json::to_string(doc).map_err(|e| SaveError::Other(Box::new(e)))?;
            match self.store.set(STORAGE_KEY, &text) {
                Ok(()) => {
                    debug!(bytes = text.len(), "saved dashboard data");
                    Ok(())
                }
                Err(StoreError::QuotaExceeded { needed, capacity }) => {
                    warn!(needed, capacity, "dashboard data exceeds the storage quota");
                    Err(SaveError::Quota {
                        bytes: needed,
                        capacity,
                    })
                }
                Err(err) => {
                    warn!(error = ?err, "saving dashboard data failed");
                    Err(SaveError::Other(Box::new(err)))
                }
            }
        }

        /// Remove the stored document.
        pub fn clear(&mut self) -> Result<(), StoreError> {
            self.store.remove(STORAGE_KEY)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::core::*;
        use pretty_assertions::assert_eq;
        use serde_json::json;

        #[test]
        fn first_load_persists_starter_document() {
            let mut gw = Gateway::new(MemoryStore::new());
            let doc = gw.load().unwrap();
            assert_eq!(doc, Document::starter());
            let stored = gw.store().get(STORAGE_KEY).unwrap().unwrap();
            assert_eq!(parse_document(&stored).unwrap(), doc);
        }

        #[test]
        fn first_load_survives_a_full_store() {
            let mut gw = Gateway::new(MemoryStore::with_capacity_bytes(10));
            let doc = gw.load().unwrap();
            assert_eq!(doc.sections.len(), 2);
            assert_eq!(gw.store().get(STORAGE_KEY).unwrap(), None);
        }

        #[test]
        fn stored_data_is_migrated_on_load() {
            let mut store = MemoryStore::new();
            let legacy = json!({ "newsFeeds": ["https://threatpost.com/feed/"], "theme": "light" });
            store.set(STORAGE_KEY, &legacy.to_string()).unwrap();
            let doc = Gateway::new(store).load().unwrap();
            assert_eq!(doc.news_feeds[0].name, "Threatpost");
            assert_eq!(doc.theme, Theme::Light);
            assert_eq!(doc.projects[0].id.as_str(), PLACEHOLDER_PROJECT_ID);
        }

        #[test]
        fn corrupt_data_is_reported() {
            let mut store = MemoryStore::new();
            store.set(STORAGE_KEY, "{not json").unwrap();
            let mut gw = Gateway::new(store);
            assert!(matches!(gw.load(), Err(LoadError::Corrupt(CorruptData::Json(_)))));

            let mut store = MemoryStore::new();
            store.set(STORAGE_KEY, "[1, 2]").unwrap();
            let mut gw = Gateway::new(store);
            assert!(matches!(gw.load(), Err(LoadError::Corrupt(CorruptData::Shape(_)))));
        }

        #[test]
        fn quota_failure_is_typed_and_keeps_previous_value() {
            let mut gw = Gateway::new(MemoryStore::new());
            let doc = Document::default();
            gw.save(&doc).unwrap();
            let before = gw.store().get(STORAGE_KEY).unwrap();

            let mut store = gw.into_inner();
            store.set_capacity_bytes(Some(store.used_bytes() + 16));
            let mut gw = Gateway::new(store);
            let mut bigger = doc.clone();
            bigger.sections.push(Section::new("s", "A section with a long enough name"));
            let err = gw.save(&bigger).unwrap_err();
            assert!(matches!(err, SaveError::Quota { .. }));
            assert!(err.to_string().contains("export your data"));
            assert_eq!(gw.store().get(STORAGE_KEY).unwrap(), before);
        }

        #[test]
        fn file_store_round_trips_and_removes() {
            let dir = tempfile::tempdir().unwrap();
            let mut store = FileStore::new(dir.path().join("data"));
            assert_eq!(store.get(STORAGE_KEY).unwrap(), None);
            store.set(STORAGE_KEY, "{\"a\":1}").unwrap();
            assert_eq!(store.get(STORAGE_KEY).unwrap().as_deref(), Some("{\"a\":1}"));
            assert!(!dir.path().join("data").join(".dashboardData.json.tmp").exists());
            store.remove(STORAGE_KEY).unwrap();
            store.remove(STORAGE_KEY).unwrap();
            assert_eq!(store.get(STORAGE_KEY).unwrap(), None);
        }

        #[test]
        fn file_store_enforces_quota_and_key_shape() {
            let dir = tempfile::tempdir().unwrap();
            let mut store = FileStore::new(dir.path()).with_quota(Some(8));
            store.set("small", "1234").unwrap();
            // Overwriting a key does not count its old size.
            store.set("small", "12345678").unwrap();
            let err = store.set("other", "x").unwrap_err();
            assert!(matches!(err, StoreError::QuotaExceeded { needed: 9, capacity: 8 }));
            assert!(matches!(store.set("../escape", "x"), Err(StoreError::Unavailable(_))));
        }

        #[test]
        fn clear_removes_the_document() {
            let mut gw = Gateway::new(MemoryStore::new());
            gw.save(&Document::default()).unwrap();
            gw.clear().unwrap();
            assert_eq!(gw.store().get(STORAGE_KEY).unwrap(), None);
        }
    }
}

pub mod query {
    //! Read-side views. Every function borrows its input and returns a new
    //! ordered `Vec` of references; nothing here mutates the document.

    use crate::core::*;
    use chrono::NaiveDate;
    use std::cmp::Ordering;

    /* ------------------------------ Sort state ------------------------------ */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub enum SortDirection {
        #[default]
        Ascending,
        Descending,
    }

    impl SortDirection {
        pub fn reversed(self) -> Self {
            match self {
                SortDirection::Ascending => SortDirection::Descending,
                SortDirection::Descending => SortDirection::Ascending,
            }
        }

        fn apply(self, ord: Ordering) -> Ordering {
            match self {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            }
        }
    }

    /// Column sort selection. `key: None` keeps the source order.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SortState<K> {
        pub key: Option<K>,
        pub direction: SortDirection,
    }

    impl<K> Default for SortState<K> {
        fn default() -> Self {
            Self {
                key: None,
                direction: SortDirection::Ascending,
            }
        }
    }

    impl<K: Copy + PartialEq> SortState<K> {
        pub fn by(key: K) -> Self {
            Self {
                key: Some(key),
                direction: SortDirection::Ascending,
            }
        }

        /// Reselecting the current key flips the direction; a new key starts ascending.
        pub fn select(&mut self, key: K) {
            if self.key == Some(key) {
                self.direction = self.direction.reversed();
            } else {
                self.key = Some(key);
                self.direction = SortDirection::Ascending;
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum ProjectSortKey {
        Name,
        Status,
        DueDate,
        Progress,
        TaskCount,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum TaskSortKey {
        Title,
        Status,
        Priority,
        DueDate,
        Progress,
    }

    /// Absent dates sort after every present date.
    fn cmp_due(a: Option<NaiveDate>, b: Option<NaiveDate>) -> Ordering {
        match (a, b) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }

    fn cmp_folded(a: &str, b: &str) -> Ordering {
        a.to_lowercase().cmp(&b.to_lowercase())
    }

    fn contains_folded(haystack: &str, needle: &str) -> bool {
        haystack.to_lowercase().contains(needle)
    }

    /* ------------------------------ Progress ------------------------------ */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Progress {
        pub done: usize,
        pub total: usize,
    }

    impl Progress {
        /// Whole percent, rounded half up; 0 when there is nothing to do.
        pub fn percent(&self) -> u8 {
            if self.total == 0 {
                return 0;
            }
            ((self.done * 200 + self.total) / (2 * self.total)) as u8
        }

        /// Compares `done / total` exactly (0 when `total == 0`).
        pub fn cmp_ratio(&self, other: &Progress) -> Ordering {
            let (a_done, a_total) = if self.total == 0 { (0, 1) } else { (self.done, self.total) };
            let (b_done, b_total) = if other.total == 0 { (0, 1) } else { (other.done, other.total) };
            (a_done * b_total).cmp(&(b_done * a_total))
        }
    }

    /// Tasks whose status counts as done (current and legacy labels).
    pub fn project_progress(project: &Project) -> Progress {
        Progress {
            done: project.tasks.iter().filter(|t| status::is_done(&t.status)).count(),
            total: project.tasks.len(),
        }
    }

    /// Checked todos.
    pub fn task_progress(task: &Task) -> Progress {
        Progress {
            done: task.todos.iter().filter(|t| t.done).count(),
            total: task.todos.len(),
        }
    }

    /* ------------------------------ Due dates ------------------------------ */

    /// Due strictly before `today` and not in a terminal status.
    pub fn is_overdue(due: Option<NaiveDate>, status: &str, today: NaiveDate) -> bool {
        due.is_some_and(|d| d < today) && !status::is_terminal(status)
    }

    pub fn overdue_task_count(project: &Project, today: NaiveDate) -> usize {
        project
            .tasks
            .iter()
            .filter(|t| is_overdue(t.due_date, &t.status, today))
            .count()
    }

    pub fn incomplete_task_count(project: &Project) -> usize {
        project.tasks.iter().filter(|t| !status::is_done(&t.status)).count()
    }

    /// Earliest task due today or later that is not done.
    pub fn next_due_task(project: &Project, today: NaiveDate) -> Option<&Task> {
        project
            .tasks
            .iter()
            .filter(|t| !status::is_done(&t.status))
            .filter_map(|t| t.due_date.filter(|d| *d >= today).map(|d| (d, t)))
            .min_by_key(|(d, _)| *d)
            .map(|(_, t)| t)
    }

    /* ------------------------------ Bookmarks ------------------------------ */

    /// A section with the bookmarks that matched a search.
    #[derive(Debug, Clone, PartialEq)]
    pub struct SectionMatches<'a> {
        pub section: &'a Section,
        pub bookmarks: Vec<&'a Bookmark>,
    }

    pub fn bookmark_matches(bookmark: &Bookmark, needle: &str) -> bool {
        contains_folded(&bookmark.name, needle)
            || contains_folded(&bookmark.url, needle)
            || contains_folded(&bookmark.notes, needle)
            || bookmark.tags.iter().any(|t| contains_folded(t, needle))
    }

    /// Case-insensitive substring search over name, url, notes and tags.
    /// An empty query shows every section; otherwise only sections with a match.
    pub fn search_bookmarks<'a>(sections: &'a [Section], query: &str) -> Vec<SectionMatches<'a>> {
        let needle = query.trim().to_lowercase();
        sections
            .iter()
            .filter_map(|section| {
                let bookmarks: Vec<_> = section
                    .bookmarks
                    .iter()
                    .filter(|b| needle.is_empty() || bookmark_matches(b, &needle))
                    .collect();
                (needle.is_empty() || !bookmarks.is_empty()).then_some(SectionMatches { section, bookmarks })
            })
            .collect()
    }

    /* ------------------------------ Projects ------------------------------ */

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct ProjectFilter {
        pub query: String,
        pub hide_completed: bool,
        pub hide_archived: bool,
    }

    impl ProjectFilter {
        pub fn matches(&self, project: &Project) -> bool {
            let needle = self.query.trim().to_lowercase();
            let text_ok = needle.is_empty()
                || contains_folded(&project.name, &needle)
                || contains_folded(&project.description, &needle)
                || project.tags.iter().any(|t| contains_folded(t, &needle));
            text_ok
                && !(self.hide_completed && project.status == status::COMPLETED)
                && !(self.hide_archived && project.status == status::ARCHIVED)
        }
    }

    pub fn filter_projects<'a>(projects: &'a [Project], filter: &ProjectFilter) -> Vec<&'a Project> {
        projects.iter().filter(|p| filter.matches(p)).collect()
    }

    /// Stable sort; equal keys keep their incoming order in both directions.
    pub fn sort_projects<'a>(mut projects: Vec<&'a Project>, sort: &SortState<ProjectSortKey>) -> Vec<&'a Project> {
        let Some(key) = sort.key else {
            return projects;
        };
        projects.sort_by(|a, b| {
            let ord = match key {
                ProjectSortKey::Name => cmp_folded(&a.name, &b.name),
                ProjectSortKey::Status => cmp_folded(&a.status, &b.status),
                ProjectSortKey::DueDate => cmp_due(a.due_date, b.due_date),
                ProjectSortKey::Progress => project_progress(a).cmp_ratio(&project_progress(b)),
                ProjectSortKey::TaskCount => a.tasks.len().cmp(&b.tasks.len()),
            };
            sort.direction.apply(ord)
        });
        projects
    }

    /* ------------------------------ Tasks ------------------------------ */

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct TaskFilter {
        pub query: String,
        /// Hides `Completed` and `Done` tasks.
        pub hide_completed: bool,
    }

    impl TaskFilter {
        pub fn matches(&self, task: &Task) -> bool {
            if self.hide_completed && status::is_done(&task.status) {
                return false;
            }
            let needle = self.query.trim().to_lowercase();
            needle.is_empty()
                || contains_folded(&task.title, &needle)
                || contains_folded(&task.notes, &needle)
                || contains_folded(&task.tags, &needle)
                || task.todos.iter().any(|t| contains_folded(&t.text, &needle))
        }
    }

    pub fn filter_tasks<'a>(tasks: &'a [Task], filter: &TaskFilter) -> Vec<&'a Task> {
        tasks.iter().filter(|t| filter.matches(t)).collect()
    }

    pub fn sort_tasks<'a>(mut tasks: Vec<&'a Task>, sort: &SortState<TaskSortKey>) -> Vec<&'a Task> {
        let Some(key) = sort.key else {
            return tasks;
        };
        tasks.sort_by(|a, b| {
            let ord = match key {
                TaskSortKey::Title => cmp_folded(&a.title, &b.title),
                TaskSortKey::Status => cmp_folded(&a.status, &b.status),
                TaskSortKey::Priority => a.priority.rank().cmp(&b.priority.rank()),
                TaskSortKey::DueDate => cmp_due(a.due_date, b.due_date),
                TaskSortKey::Progress => task_progress(a).cmp_ratio(&task_progress(b)),
            };
            sort.direction.apply(ord)
        });
        tasks
    }

    /* ------------------------------ Calendar ------------------------------ */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    pub enum EventKind {
        Project,
        Task,
    }

    /// A project or task with a due date, as placed on the calendar.
    #[derive(Debug, Clone, PartialEq)]
    pub struct CalendarEvent<'a> {
        pub kind: EventKind,
        pub title: &'a str,
        pub due_date: NaiveDate,
        pub status: &'a str,
        pub project: &'a Project,
        pub task: Option<&'a Task>,
        pub overdue: bool,
    }

    /// Every dated project and task, in document order.
    pub fn calendar_events(projects: &[Project], today: NaiveDate) -> Vec<CalendarEvent<'_>> {
        let mut events = vec![];
        for project in projects {
            if let Some(due) = project.due_date {
                events.push(CalendarEvent {
                    kind: EventKind::Project,
                    title: &project.name,
                    due_date: due,
                    status: &project.status,
                    project,
                    task: None,
                    overdue: is_overdue(Some(due), &project.status, today),
                });
            }
            for task in &project.tasks {
                if let Some(due) = task.due_date {
                    events.push(CalendarEvent {
                        kind: EventKind::Task,
                        title: &task.title,
                        due_date: due,
                        status: &task.status,
                        project,
                        task: Some(task),
                        overdue: is_overdue(Some(due), &task.status, today),
                    });
                }
            }
        }
        events
    }

    /// Events due within `from..=to`, ordered by day, then overdue first,
    /// projects before tasks, and title.
    pub fn events_between<'e, 'a>(
        events: &'e [CalendarEvent<'a>],
        from: NaiveDate,
        to: NaiveDate,
    ) -> Vec<&'e CalendarEvent<'a>> {
        let mut picked: Vec<_> = events
            .iter()
            .filter(|e| e.due_date >= from && e.due_date <= to)
            .collect();
        picked.sort_by(|a, b| {
            a.due_date
                .cmp(&b.due_date)
                .then_with(|| b.overdue.cmp(&a.overdue))
                .then_with(|| a.kind.cmp(&b.kind))
                .then_with(|| cmp_folded(a.title, b.title))
        });
        picked
    }

}

pub mod actions {
    //! Mutations called by views. Each takes the document mutably and either
    //! applies the whole change or returns a `ValidationError` without touching it.
    //! Persistence is the caller's job (`dashboard::Dashboard::mutate`).

    use crate::core::*;
    use crate::migrate::normalize_subreddit;
    use crate::query;
    use chrono::{NaiveDate, Utc};
    use std::str::FromStr;
    use tracing::debug;

    /* ------------------------------ Errors ------------------------------ */

    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    pub enum ValidationError {
        #[error("{0} is required")]
        Required(&'static str),
        #[error("javascript: URLs are not allowed for security reasons")]
        UnsafeUrl,
        #[error("icon must be an image data URI (data:image/...)")]
        IconNotImage,
        #[error("icon is too large ({size_kb} KB); use an image under {limit_kb} KB")]
        IconTooLarge { size_kb: usize, limit_kb: usize },
        #[error("invalid color {0:?} (expected #rgb or #rrggbb)")]
        InvalidColor(String),
        #[error("no {kind} with id {id:?}")]
        UnknownId { kind: &'static str, id: String },
        #[error("{0:?} is not a column of this board")]
        UnknownColumn(String),
        #[error("{kind} {name:?} already exists")]
        Duplicate { kind: &'static str, name: String },
        #[error("{0} incomplete task(s); complete all tasks first")]
        IncompleteTasks(usize),
        #[error("the last project cannot be deleted")]
        LastProject,
        #[error("a board needs at least one column")]
        LastColumn,
        #[error("create a section first")]
        NoSections,
        #[error("clipboard text does not look like a link")]
        NotALink,
    }

    fn unknown(kind: &'static str, id: &impl ToString) -> ValidationError {
        ValidationError::UnknownId {
            kind,
            id: id.to_string(),
        }
    }

    fn required(value: &str, what: &'static str) -> Result<String, ValidationError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::Required(what));
        }
        Ok(trimmed.to_string())
    }

    /// Split a comma-separated tag input into trimmed, non-empty tags.
    pub fn split_tags(input: &str) -> Vec<String> {
        input
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Keep `order` entries that exist in `current` (first occurrence), then the
    /// remaining entries of `current` in their old order.
    fn reordered<T: Clone + PartialEq>(current: &[T], order: &[T]) -> Vec<T> {
        let mut out: Vec<T> = Vec::with_capacity(current.len());
        for item in order {
            if current.contains(item) && !out.contains(item) {
                out.push(item.clone());
            }
        }
        for item in current {
            if !out.contains(item) {
                out.push(item.clone());
            }
        }
        out
    }

    /* ------------------------------ Sections ------------------------------ */

    pub fn add_section(doc: &mut Document, name: &str) -> Result<SectionId, ValidationError> {
        let name = required(name, "section name")?;
        let id = SectionId::from(time_token("sec", |c| doc.sections.iter().any(|s| s.id.as_str() == c)));
        doc.sections.push(Section::new(id.clone(), name));
        Ok(id)
    }

    pub fn rename_section(doc: &mut Document, id: &SectionId, name: &str) -> Result<(), ValidationError> {
        let name = required(name, "section name")?;
        let section = doc.section_mut(id).ok_or_else(|| unknown("section", id))?;
        section.name = name;
        Ok(())
    }

    /// Removes the section together with its bookmarks.
    pub fn delete_section(doc: &mut Document, id: &SectionId) -> Result<Section, ValidationError> {
        let at = doc
            .sections
            .iter()
            .position(|s| &s.id == id)
            .ok_or_else(|| unknown("section", id))?;
        Ok(doc.sections.remove(at))
    }

    /// Move a section to `index` (clamped to the end).
    pub fn move_section(doc: &mut Document, id: &SectionId, index: usize) -> Result<(), ValidationError> {
        let section = delete_section(doc, id)?;
        let index = index.min(doc.sections.len());
        doc.sections.insert(index, section);
        Ok(())
    }

    /* ------------------------------ Bookmarks ------------------------------ */

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct BookmarkDraft {
        pub name: String,
        pub url: String,
        pub notes: String,
        pub tags: Vec<String>,
        /// `data:image/...` URI.
        pub icon: Option<String>,
    }

    /// Approximate decoded size of a data URI payload.
    fn data_uri_bytes(uri: &str) -> usize {
        let Some((meta, payload)) = uri.split_once(',') else {
            return uri.len();
        };
        if meta.ends_with(";base64") {
            payload.trim_end_matches('=').len() * 3 / 4
        } else {
            payload.len()
        }
    }

    pub fn validate_icon(icon: &str) -> Result<(), ValidationError> {
        if !icon.starts_with("data:image/") {
            return Err(ValidationError::IconNotImage);
        }
        let size = data_uri_bytes(icon);
        if size > MAX_ICON_BYTES {
            return Err(ValidationError::IconTooLarge {
                size_kb: size.div_ceil(1024),
                limit_kb: MAX_ICON_BYTES / 1024,
            });
        }
        Ok(())
    }

    impl BookmarkDraft {
        fn into_validated(self) -> Result<BookmarkDraft, ValidationError> {
            let name = required(&self.name, "bookmark name")?;
            let url = required(&self.url, "bookmark url")?;
            if is_script_url(&url) {
                return Err(ValidationError::UnsafeUrl);
            }
            let icon = self.icon.filter(|i| !i.trim().is_empty());
            if let Some(icon) = &icon {
                validate_icon(icon)?;
            }
            Ok(BookmarkDraft {
                name,
                url,
                notes: self.notes.trim().to_string(),
                tags: split_tags(&self.tags.join(",")),
                icon,
            })
        }
    }

    pub fn add_bookmark(
        doc: &mut Document,
        section: &SectionId,
        draft: BookmarkDraft,
    ) -> Result<BookmarkId, ValidationError> {
        let draft = draft.into_validated()?;
        let id = BookmarkId::from(time_token("bm", |c| doc.bookmarks().any(|b| b.id.as_str() == c)));
        let section = doc.section_mut(section).ok_or_else(|| unknown("section", section))?;
        let mut bookmark = Bookmark::new(id.clone(), draft.name, draft.url);
        bookmark.notes = draft.notes;
        bookmark.tags = draft.tags;
        bookmark.icon = draft.icon;
        section.bookmarks.push(bookmark);
        Ok(id)
    }

    /// Replaces the editable fields; unknown extra fields are kept.
    pub fn edit_bookmark(doc: &mut Document, id: &BookmarkId, draft: BookmarkDraft) -> Result<(), ValidationError> {
        let draft = draft.into_validated()?;
        let (si, bi) = doc.find_bookmark(id).ok_or_else(|| unknown("bookmark", id))?;
        let bookmark = &mut doc.sections[si].bookmarks[bi];
        bookmark.name = draft.name;
        bookmark.url = draft.url;
        bookmark.notes = draft.notes;
        bookmark.tags = draft.tags;
        bookmark.icon = draft.icon;
        Ok(())
    }

    pub fn delete_bookmark(doc: &mut Document, id: &BookmarkId) -> Result<Bookmark, ValidationError> {
        let (si, bi) = doc.find_bookmark(id).ok_or_else(|| unknown("bookmark", id))?;
        Ok(doc.sections[si].bookmarks.remove(bi))
    }

    /// Move a bookmark into `to` at `index` (clamped), possibly within the same section.
    pub fn move_bookmark(
        doc: &mut Document,
        id: &BookmarkId,
        to: &SectionId,
        index: usize,
    ) -> Result<(), ValidationError> {
        if doc.section(to).is_none() {
            return Err(unknown("section", to));
        }
        let bookmark = delete_bookmark(doc, id)?;
        let target = doc.section_mut(to).ok_or_else(|| unknown("section", to))?;
        let index = index.min(target.bookmarks.len());
        target.bookmarks.insert(index, bookmark);
        Ok(())
    }

    /// Pasted text that looks like a link becomes a draft for the first section.
    /// Nothing is added until the draft is saved through `add_bookmark`.
    pub fn paste_bookmark_draft(doc: &Document, text: &str) -> Result<(SectionId, BookmarkDraft), ValidationError> {
        let text = text.trim();
        if !(text.contains("http://") || text.contains("https://") || text.contains("www.")) {
            return Err(ValidationError::NotALink);
        }
        let section = doc.sections.first().ok_or(ValidationError::NoSections)?;
        Ok((
            section.id.clone(),
            BookmarkDraft {
                url: text.to_string(),
                ..BookmarkDraft::default()
            },
        ))
    }

    /* ------------------------------ Feeds ------------------------------ */

    pub fn add_feed(doc: &mut Document, name: &str, url: &str) -> Result<String, ValidationError> {
        let name = required(name, "feed name")?;
        let url = required(url, "feed url")?;
        if is_script_url(&url) {
            return Err(ValidationError::UnsafeUrl);
        }
        if doc.news_feeds.iter().any(|f| f.url == url) {
            return Err(ValidationError::Duplicate { kind: "feed", name: url });
        }
        let id = time_token("feed", |c| doc.news_feeds.iter().any(|f| f.id.as_deref() == Some(c)));
        let mut feed = FeedSource::new(url, name);
        feed.id = Some(id.clone());
        doc.news_feeds.push(feed);
        Ok(id)
    }

    pub fn rename_feed(doc: &mut Document, url: &str, name: &str) -> Result<(), ValidationError> {
        let name = required(name, "feed name")?;
        let feed = doc
            .news_feeds
            .iter_mut()
            .find(|f| f.url == url.trim())
            .ok_or_else(|| unknown("feed", &url))?;
        feed.name = name;
        Ok(())
    }

    pub fn remove_feed(doc: &mut Document, url: &str) -> Result<FeedSource, ValidationError> {
        let at = doc
            .news_feeds
            .iter()
            .position(|f| f.url == url.trim())
            .ok_or_else(|| unknown("feed", &url))?;
        Ok(doc.news_feeds.remove(at))
    }

    /* ------------------------------ Subreddits ------------------------------ */

    /// Returns the stored (normalized) name.
    pub fn add_subreddit(doc: &mut Document, name: &str) -> Result<String, ValidationError> {
        let name = normalize_subreddit(name);
        if name.is_empty() {
            return Err(ValidationError::Required("subreddit name"));
        }
        if doc.reddit_subs.contains(&name) {
            return Err(ValidationError::Duplicate {
                kind: "subreddit",
                name,
            });
        }
        doc.reddit_subs.push(name.clone());
        Ok(name)
    }

    pub fn remove_subreddit(doc: &mut Document, name: &str) -> Result<(), ValidationError> {
        let name = normalize_subreddit(name);
        let at = doc
            .reddit_subs
            .iter()
            .position(|s| *s == name)
            .ok_or_else(|| unknown("subreddit", &name))?;
        doc.reddit_subs.remove(at);
        Ok(())
    }

    /* ------------------------------ Theme ------------------------------ */

    pub fn set_theme(doc: &mut Document, theme: Theme) {
        doc.theme = theme;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ThemeColor {
        BgPrimary,
        BgSecondary,
        BgTertiary,
        TextPrimary,
        Accent,
    }

    impl FromStr for ThemeColor {
        type Err = ValidationError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s.trim() {
                "bgPrimary" | "bg-primary" => Ok(ThemeColor::BgPrimary),
                "bgSecondary" | "bg-secondary" => Ok(ThemeColor::BgSecondary),
                "bgTertiary" | "bg-tertiary" => Ok(ThemeColor::BgTertiary),
                "textPrimary" | "text-primary" => Ok(ThemeColor::TextPrimary),
                "accent" => Ok(ThemeColor::Accent),
                other => Err(unknown("theme color", &other)),
            }
        }
    }

    fn is_hex_color(value: &str) -> bool {
        value
            .strip_prefix('#')
            .is_some_and(|hex| matches!(hex.len(), 3 | 6) && hex.chars().all(|c| c.is_ascii_hexdigit()))
    }

    pub fn set_custom_color(doc: &mut Document, color: ThemeColor, value: &str) -> Result<(), ValidationError> {
        let value = value.trim().to_ascii_lowercase();
        if !is_hex_color(&value) {
            return Err(ValidationError::InvalidColor(value));
        }
        let theme = &mut doc.custom_theme;
        let slot = match color {
            ThemeColor::BgPrimary => &mut theme.bg_primary,
            ThemeColor::BgSecondary => &mut theme.bg_secondary,
            ThemeColor::BgTertiary => &mut theme.bg_tertiary,
            ThemeColor::TextPrimary => &mut theme.text_primary,
            ThemeColor::Accent => &mut theme.accent,
        };
        *slot = value;
        Ok(())
    }

    /* ------------------------------ Projects ------------------------------ */

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct ProjectDraft {
        pub name: String,
        pub description: String,
        pub notes: String,
        /// Defaults to `Planning` for new projects; unchanged when editing.
        pub status: Option<String>,
        pub due_date: Option<NaiveDate>,
        pub folder_path: Option<String>,
        pub tags: Vec<String>,
    }

    fn project_mut<'a>(doc: &'a mut Document, id: &ProjectId) -> Result<&'a mut Project, ValidationError> {
        doc.project_mut(id).ok_or_else(|| unknown("project", id))
    }

    /// A project may only become `Completed` when none of its tasks is pending.
    fn guard_completed(project: &Project, new_status: &str) -> Result<(), ValidationError> {
        if new_status == status::COMPLETED {
            let incomplete = query::incomplete_task_count(project);
            if incomplete > 0 {
                return Err(ValidationError::IncompleteTasks(incomplete));
            }
        }
        Ok(())
    }

    fn project_status(doc: &Document, status: &str) -> Result<String, ValidationError> {
        let status = status.trim();
        if !doc.has_project_column(status) {
            return Err(ValidationError::UnknownColumn(status.to_string()));
        }
        Ok(status.to_string())
    }

    /// Creates the project with the default task board and makes it active.
    pub fn create_project(doc: &mut Document, draft: ProjectDraft) -> Result<ProjectId, ValidationError> {
        let name = required(&draft.name, "project name")?;
        let status = project_status(doc, draft.status.as_deref().unwrap_or(status::PLANNING))?;
        let id = ProjectId::from(time_token("proj_", |c| doc.projects.iter().any(|p| p.id.as_str() == c)));
        let mut project = Project::new(id.clone(), name);
        project.description = draft.description.trim().to_string();
        project.notes = draft.notes.trim().to_string();
        project.status = status;
        project.due_date = draft.due_date;
        project.folder_path = draft.folder_path.map(|p| p.trim().to_string()).filter(|p| !p.is_empty());
        project.tags = split_tags(&draft.tags.join(","));
        doc.projects.push(project);
        doc.active_project_id = Some(id.clone());
        debug!(%id, "created project");
        Ok(id)
    }

    pub fn edit_project(doc: &mut Document, id: &ProjectId, draft: ProjectDraft) -> Result<(), ValidationError> {
        let name = required(&draft.name, "project name")?;
        let status = draft.status.as_deref().map(|s| project_status(doc, s)).transpose()?;
        let project = project_mut(doc, id)?;
        if let Some(status) = &status {
            guard_completed(project, status)?;
        }
        project.name = name;
        project.description = draft.description.trim().to_string();
        project.notes = draft.notes.trim().to_string();
        if let Some(status) = status {
            project.status = status;
        }
        project.due_date = draft.due_date;
        if project.due_date.is_some() {
            project.extra.shift_remove("dueDate");
        }
        project.folder_path = draft.folder_path.map(|p| p.trim().to_string()).filter(|p| !p.is_empty());
        project.tags = split_tags(&draft.tags.join(","));
        Ok(())
    }

    pub fn rename_project(doc: &mut Document, id: &ProjectId, name: &str) -> Result<(), ValidationError> {
        let name = required(name, "project name")?;
        project_mut(doc, id)?.name = name;
        Ok(())
    }

    /// Deletes the project and its tasks. The active project falls back to the first one.
    pub fn delete_project(doc: &mut Document, id: &ProjectId) -> Result<Project, ValidationError> {
        let at = doc
            .projects
            .iter()
            .position(|p| &p.id == id)
            .ok_or_else(|| unknown("project", id))?;
        if doc.projects.len() == 1 {
            return Err(ValidationError::LastProject);
        }
        let removed = doc.projects.remove(at);
        if doc.active_project_id.as_ref() == Some(id) {
            doc.active_project_id = doc.projects.first().map(|p| p.id.clone());
        }
        Ok(removed)
    }

    pub fn select_project(doc: &mut Document, id: &ProjectId) -> Result<(), ValidationError> {
        if doc.project(id).is_none() {
            return Err(unknown("project", id));
        }
        doc.active_project_id = Some(id.clone());
        Ok(())
    }

    pub fn set_project_status(doc: &mut Document, id: &ProjectId, status: &str) -> Result<(), ValidationError> {
        let status = project_status(doc, status)?;
        let project = project_mut(doc, id)?;
        guard_completed(project, &status)?;
        project.status = status;
        Ok(())
    }

    /// Reorder the project board. Columns missing from `visible` keep their
    /// relative order after the listed ones.
    pub fn reorder_project_columns(doc: &mut Document, visible: &[String]) -> Result<(), ValidationError> {
        if let Some(bad) = visible.iter().find(|c| !doc.has_project_column(c)) {
            return Err(ValidationError::UnknownColumn(bad.clone()));
        }
        doc.project_columns = reordered(&doc.project_columns, visible);
        Ok(())
    }

    /// Listed projects first, the rest after them in their old order.
    pub fn reorder_projects(doc: &mut Document, order: &[ProjectId]) -> Result<(), ValidationError> {
        if let Some(bad) = order.iter().find(|id| doc.project(id).is_none()) {
            return Err(unknown("project", bad));
        }
        let ids: Vec<ProjectId> = doc.projects.iter().map(|p| p.id.clone()).collect();
        let ordered = reordered(&ids, order);
        let mut old = std::mem::take(&mut doc.projects);
        for id in ordered {
            if let Some(at) = old.iter().position(|p| p.id == id) {
                doc.projects.push(old.remove(at));
            }
        }
        Ok(())
    }

    /* ------------------------------ Task columns ------------------------------ */

    pub fn add_column(doc: &mut Document, project: &ProjectId, name: &str) -> Result<(), ValidationError> {
        let name = required(name, "column name")?;
        let project = project_mut(doc, project)?;
        if project.has_column(&name) {
            return Err(ValidationError::Duplicate { kind: "column", name });
        }
        project.columns.push(name);
        Ok(())
    }

    /// Removes a column; its tasks move to the first remaining column.
    /// Returns how many tasks moved.
    pub fn remove_column(doc: &mut Document, project: &ProjectId, name: &str) -> Result<usize, ValidationError> {
        let project = project_mut(doc, project)?;
        let at = project
            .columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| ValidationError::UnknownColumn(name.to_string()))?;
        if project.columns.len() == 1 {
            return Err(ValidationError::LastColumn);
        }
        let removed = project.columns.remove(at);
        let fallback = project.columns[0].clone();
        let mut moved = 0;
        for task in project.tasks.iter_mut().filter(|t| t.status == removed) {
            task.status = fallback.clone();
            moved += 1;
        }
        Ok(moved)
    }

    pub fn reorder_columns(doc: &mut Document, project: &ProjectId, visible: &[String]) -> Result<(), ValidationError> {
        let project = project_mut(doc, project)?;
        if let Some(bad) = visible.iter().find(|c| !project.has_column(c)) {
            return Err(ValidationError::UnknownColumn(bad.clone()));
        }
        project.columns = reordered(&project.columns, visible);
        Ok(())
    }

    /* ------------------------------ Tasks ------------------------------ */

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct TaskDraft {
        pub title: String,
        pub notes: String,
        /// Defaults to the project's default task status.
        pub status: Option<String>,
        pub priority: Priority,
        pub due_date: Option<NaiveDate>,
        /// Comma-separated.
        pub tags: String,
        pub folder_path: Option<String>,
    }

    fn task_status(project: &Project, status: Option<&str>) -> Result<String, ValidationError> {
        match status.map(str::trim) {
            None | Some("") => Ok(project.default_task_status()),
            Some(s) if project.has_column(s) => Ok(s.to_string()),
            Some(s) => Err(ValidationError::UnknownColumn(s.to_string())),
        }
    }

    fn task_mut<'a>(doc: &'a mut Document, project: &ProjectId, task: &TaskId) -> Result<&'a mut Task, ValidationError> {
        project_mut(doc, project)?
            .task_mut(task)
            .ok_or_else(|| unknown("task", task))
    }

    pub fn add_task(doc: &mut Document, project: &ProjectId, draft: TaskDraft) -> Result<TaskId, ValidationError> {
        let title = required(&draft.title, "task title")?;
        let id = TaskId::from(time_token("task_", |c| doc.tasks().any(|(_, t)| t.id.as_str() == c)));
        let project = project_mut(doc, project)?;
        let status = task_status(project, draft.status.as_deref())?;
        let mut task = Task::new(id.clone(), title, status);
        task.notes = draft.notes.trim().to_string();
        task.priority = draft.priority;
        task.due_date = draft.due_date;
        task.tags = draft.tags.trim().to_string();
        task.folder_path = draft.folder_path.map(|p| p.trim().to_string()).filter(|p| !p.is_empty());
        task.created_at = Some(Utc::now());
        project.tasks.push(task);
        Ok(id)
    }

    /// Replaces the editable fields; todos and creation time are kept.
    pub fn edit_task(doc: &mut Document, project: &ProjectId, task: &TaskId, draft: TaskDraft) -> Result<(), ValidationError> {
        let title = required(&draft.title, "task title")?;
        let owner = project_mut(doc, project)?;
        let status = match draft.status.as_deref() {
            Some(s) => task_status(owner, Some(s))?,
            None => owner.task(task).ok_or_else(|| unknown("task", task))?.status.clone(),
        };
        let task = owner.task_mut(task).ok_or_else(|| unknown("task", task))?;
        task.title = title;
        task.notes = draft.notes.trim().to_string();
        task.status = status;
        task.priority = draft.priority;
        task.due_date = draft.due_date;
        if task.due_date.is_some() {
            task.extra.shift_remove("dueDate");
        }
        task.tags = draft.tags.trim().to_string();
        task.folder_path = draft.folder_path.map(|p| p.trim().to_string()).filter(|p| !p.is_empty());
        Ok(())
    }

    pub fn delete_task(doc: &mut Document, project: &ProjectId, task: &TaskId) -> Result<Task, ValidationError> {
        let project = project_mut(doc, project)?;
        let at = project
            .tasks
            .iter()
            .position(|t| &t.id == task)
            .ok_or_else(|| unknown("task", task))?;
        Ok(project.tasks.remove(at))
    }

    /// Kanban move: the target must be one of the project's columns.
    pub fn move_task(doc: &mut Document, project: &ProjectId, task: &TaskId, column: &str) -> Result<(), ValidationError> {
        let owner = project_mut(doc, project)?;
        if !owner.has_column(column) {
            return Err(ValidationError::UnknownColumn(column.to_string()));
        }
        let task = owner.task_mut(task).ok_or_else(|| unknown("task", task))?;
        task.status = column.to_string();
        Ok(())
    }

    /* ------------------------------ Todos ------------------------------ */

    pub fn add_todo(doc: &mut Document, project: &ProjectId, task: &TaskId, text: &str) -> Result<TodoId, ValidationError> {
        let text = required(text, "todo text")?;
        let task = task_mut(doc, project, task)?;
        let id = TodoId::from(time_token("todo_", |c| task.todos.iter().any(|t| t.id.as_str() == c)));
        task.todos.push(Todo::new(id.clone(), text));
        Ok(id)
    }

    /// Returns the new `done` state.
    pub fn toggle_todo(doc: &mut Document, project: &ProjectId, task: &TaskId, todo: &TodoId) -> Result<bool, ValidationError> {
        let todo = task_mut(doc, project, task)?
            .todo_mut(todo)
            .ok_or_else(|| unknown("todo", todo))?;
        todo.done = !todo.done;
        Ok(todo.done)
    }

    pub fn remove_todo(doc: &mut Document, project: &ProjectId, task: &TaskId, todo: &TodoId) -> Result<Todo, ValidationError> {
        let task = task_mut(doc, project, task)?;
        let at = task
            .todos
            .iter()
            .position(|t| &t.id == todo)
            .ok_or_else(|| unknown("todo", todo))?;
        Ok(task.todos.remove(at))
    }

    /* ------------------------------ Reset ------------------------------ */

    pub fn reset_document(doc: &mut Document) {
        *doc = Document::default();
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use pretty_assertions::assert_eq;

        fn doc_with_section() -> (Document, SectionId) {
            let mut doc = Document::default();
            let id = add_section(&mut doc, "  Work ").unwrap();
            (doc, id)
        }

        fn draft(name: &str, url: &str) -> BookmarkDraft {
            BookmarkDraft {
                name: name.into(),
                url: url.into(),
                ..BookmarkDraft::default()
            }
        }

        #[test]
        fn sections_are_added_renamed_and_moved() {
            let (mut doc, work) = doc_with_section();
            assert!(work.as_str().starts_with("sec"));
            assert_eq!(doc.sections[0].name, "Work");
            assert_eq!(add_section(&mut doc, " "), Err(ValidationError::Required("section name")));
            let home = add_section(&mut doc, "Home").unwrap();
            assert_ne!(home, work);
            move_section(&mut doc, &home, 0).unwrap();
            assert_eq!(doc.sections[0].id, home);
            rename_section(&mut doc, &home, "House").unwrap();
            assert_eq!(doc.sections[0].name, "House");
            assert_eq!(delete_section(&mut doc, &work).unwrap().name, "Work");
            assert!(delete_section(&mut doc, &work).is_err());
        }

        #[test]
        fn bookmark_entry_rejects_missing_fields_and_script_urls() {
            let (mut doc, sec) = doc_with_section();
            assert_eq!(
                add_bookmark(&mut doc, &sec, draft("", "https://a.io")),
                Err(ValidationError::Required("bookmark name"))
            );
            assert_eq!(
                add_bookmark(&mut doc, &sec, draft("x", " ")),
                Err(ValidationError::Required("bookmark url"))
            );
            assert_eq!(
                add_bookmark(&mut doc, &sec, draft("x", "JavaScript:alert(1)")),
                Err(ValidationError::UnsafeUrl)
            );
            assert!(doc.sections[0].bookmarks.is_empty());
        }

        #[test]
        fn bookmark_tags_and_icons_are_validated() {
            let (mut doc, sec) = doc_with_section();
            let mut d = draft("Docs", "https://docs.rs");
            d.tags = vec![" rust ".into(), "".into(), "ref, api".into()];
            d.icon = Some("data:image/png;base64,AAAA".into());
            let id = add_bookmark(&mut doc, &sec, d).unwrap();
            let (si, bi) = doc.find_bookmark(&id).unwrap();
            assert_eq!(doc.sections[si].bookmarks[bi].tags, vec!["rust", "ref", "api"]);

            let mut d = draft("Bad", "https://x.io");
            d.icon = Some("https://x.io/icon.png".into());
            assert_eq!(add_bookmark(&mut doc, &sec, d), Err(ValidationError::IconNotImage));

            let mut d = draft("Big", "https://x.io");
            d.icon = Some(format!("data:image/png;base64,{}", "A".repeat(700 * 1024)));
            assert!(matches!(
                add_bookmark(&mut doc, &sec, d),
                Err(ValidationError::IconTooLarge { limit_kb: 500, .. })
            ));
        }

        #[test]
        fn bookmarks_move_between_sections_at_an_index() {
            let (mut doc, a) = doc_with_section();
            let b = add_section(&mut doc, "B").unwrap();
            let one = add_bookmark(&mut doc, &a, draft("one", "https://1")).unwrap();
            let two = add_bookmark(&mut doc, &b, draft("two", "https://2")).unwrap();
            move_bookmark(&mut doc, &one, &b, 0).unwrap();
            let names: Vec<_> = doc.sections[1].bookmarks.iter().map(|b| b.name.as_str()).collect();
            assert_eq!(names, vec!["one", "two"]);
            assert!(doc.sections[0].bookmarks.is_empty());
            move_bookmark(&mut doc, &one, &b, 99).unwrap();
            assert_eq!(doc.sections[1].bookmarks[1].id, one);
            assert!(move_bookmark(&mut doc, &two, &SectionId::from("nope"), 0).is_err());
            assert_eq!(doc.sections[1].bookmarks.len(), 2);

            edit_bookmark(&mut doc, &two, draft("Two", "https://two")).unwrap();
            assert_eq!(doc.sections[1].bookmarks[0].name, "Two");
            assert_eq!(delete_bookmark(&mut doc, &two).unwrap().url, "https://two");
        }

        #[test]
        fn paste_builds_a_draft_for_the_first_section() {
            let mut doc = Document::default();
            assert_eq!(paste_bookmark_draft(&doc, "https://a.io"), Err(ValidationError::NoSections));
            let sec = add_section(&mut doc, "S").unwrap();
            let (to, d) = paste_bookmark_draft(&doc, " www.example.com ").unwrap();
            assert_eq!(to, sec);
            assert_eq!(d.url, "www.example.com");
            assert_eq!(paste_bookmark_draft(&doc, "just words"), Err(ValidationError::NotALink));
        }

        #[test]
        fn subreddits_are_normalized_and_deduplicated() {
            let mut doc = Document::default();
            assert_eq!(add_subreddit(&mut doc, " r/RustLang ").unwrap(), "rustlang");
            assert!(matches!(add_subreddit(&mut doc, "rustlang"), Err(ValidationError::Duplicate { .. })));
            assert_eq!(add_subreddit(&mut doc, "r/"), Err(ValidationError::Required("subreddit name")));
            remove_subreddit(&mut doc, "R/rustlang").unwrap();
            assert!(!doc.reddit_subs.contains(&"rustlang".to_string()));
        }

        #[test]
        fn feeds_need_name_and_url() {
            let mut doc = Document::default();
            let before = doc.news_feeds.len();
            assert_eq!(add_feed(&mut doc, "", "https://x.io/rss"), Err(ValidationError::Required("feed name")));
            let id = add_feed(&mut doc, "X", "https://x.io/rss").unwrap();
            assert!(id.starts_with("feed"));
            assert!(matches!(add_feed(&mut doc, "X2", "https://x.io/rss"), Err(ValidationError::Duplicate { .. })));
            rename_feed(&mut doc, "https://x.io/rss", "Ex").unwrap();
            assert_eq!(doc.news_feeds[before].name, "Ex");
            remove_feed(&mut doc, "https://x.io/rss").unwrap();
            assert_eq!(doc.news_feeds.len(), before);
        }

        #[test]
        fn custom_colors_must_be_hex() {
            let mut doc = Document::default();
            set_custom_color(&mut doc, "accent".parse().unwrap(), "#FF0000").unwrap();
            assert_eq!(doc.custom_theme.accent, "#ff0000");
            assert!(set_custom_color(&mut doc, ThemeColor::BgPrimary, "red").is_err());
            set_theme(&mut doc, Theme::Custom);
            assert_eq!(doc.theme, Theme::Custom);
        }

        #[test]
        fn completed_guard_blocks_projects_with_open_tasks() {
            let mut doc = Document::default();
            let pid = ProjectId::from(PLACEHOLDER_PROJECT_ID);
            let t = add_task(&mut doc, &pid, TaskDraft { title: "Ship".into(), ..TaskDraft::default() }).unwrap();
            assert_eq!(
                set_project_status(&mut doc, &pid, "Completed"),
                Err(ValidationError::IncompleteTasks(1))
            );
            assert_eq!(doc.projects[0].status, "Active");
            move_task(&mut doc, &pid, &t, "Completed").unwrap();
            set_project_status(&mut doc, &pid, "Completed").unwrap();
            assert_eq!(doc.projects[0].status, "Completed");
            assert_eq!(
                set_project_status(&mut doc, &pid, "Nowhere"),
                Err(ValidationError::UnknownColumn("Nowhere".into()))
            );
        }

        #[test]
        fn the_last_project_cannot_be_deleted() {
            let mut doc = Document::default();
            let first = ProjectId::from(PLACEHOLDER_PROJECT_ID);
            assert_eq!(delete_project(&mut doc, &first), Err(ValidationError::LastProject));
            let second = create_project(&mut doc, ProjectDraft { name: "Second".into(), ..ProjectDraft::default() }).unwrap();
            assert_eq!(doc.active_project_id.as_ref(), Some(&second));
            assert_eq!(doc.project(&second).unwrap().status, "Planning");
            delete_project(&mut doc, &second).unwrap();
            assert_eq!(doc.active_project_id.as_ref(), Some(&first));
        }

        #[test]
        fn project_edits_and_selection() {
            let mut doc = Document::default();
            let pid = ProjectId::from(PLACEHOLDER_PROJECT_ID);
            let other = create_project(&mut doc, ProjectDraft { name: "B".into(), ..ProjectDraft::default() }).unwrap();
            select_project(&mut doc, &pid).unwrap();
            assert_eq!(doc.active_project().unwrap().id, pid);
            assert!(select_project(&mut doc, &ProjectId::from("zzz")).is_err());
            edit_project(
                &mut doc,
                &other,
                ProjectDraft {
                    name: "Bee".into(),
                    status: Some("On Hold".into()),
                    tags: vec!["a, b".into()],
                    folder_path: Some("  ".into()),
                    ..ProjectDraft::default()
                },
            )
            .unwrap();
            let p = doc.project(&other).unwrap();
            assert_eq!((p.name.as_str(), p.status.as_str()), ("Bee", "On Hold"));
            assert_eq!(p.tags, vec!["a", "b"]);
            assert_eq!(p.folder_path, None);
            rename_project(&mut doc, &other, "Bea").unwrap();
            reorder_projects(&mut doc, &[other.clone()]).unwrap();
            assert_eq!(doc.projects[0].name, "Bea");
        }

        #[test]
        fn project_board_reorder_keeps_hidden_columns_last() {
            let mut doc = Document::default();
            reorder_project_columns(&mut doc, &["Active".into(), "Planning".into()]).unwrap();
            assert_eq!(doc.project_columns, vec!["Active", "Planning", "On Hold", "Completed", "Archived"]);
            assert!(reorder_project_columns(&mut doc, &["Nope".into()]).is_err());
        }

        #[test]
        fn removing_a_column_moves_its_tasks_to_the_first_remaining() {
            let mut doc = Document::default();
            let pid = ProjectId::from(PLACEHOLDER_PROJECT_ID);
            let t = add_task(
                &mut doc,
                &pid,
                TaskDraft {
                    title: "a".into(),
                    status: Some("Not Started".into()),
                    ..TaskDraft::default()
                },
            )
            .unwrap();
            assert_eq!(remove_column(&mut doc, &pid, "Not Started").unwrap(), 1);
            let p = doc.project(&pid).unwrap();
            assert_eq!(p.task(&t).unwrap().status, "On Hold");
            assert!(p.has_column(&p.task(&t).unwrap().status));

            assert!(matches!(add_column(&mut doc, &pid, "Review"), Err(ValidationError::Duplicate { .. })));
            add_column(&mut doc, &pid, "QA").unwrap();
            reorder_columns(&mut doc, &pid, &["QA".into()]).unwrap();
            assert_eq!(doc.project(&pid).unwrap().columns[0], "QA");

            for col in ["QA", "On Hold", "In Progress", "Review"] {
                remove_column(&mut doc, &pid, col).unwrap();
            }
            assert_eq!(remove_column(&mut doc, &pid, "Completed"), Err(ValidationError::LastColumn));
            let p = doc.project(&pid).unwrap();
            assert_eq!(p.task(&t).unwrap().status, "Completed");
        }

        #[test]
        fn tasks_default_status_and_column_membership() {
            let mut doc = Document::default();
            let pid = ProjectId::from(PLACEHOLDER_PROJECT_ID);
            let t = add_task(&mut doc, &pid, TaskDraft { title: " Write ".into(), ..TaskDraft::default() }).unwrap();
            let task = doc.project(&pid).unwrap().task(&t).unwrap();
            assert_eq!(task.status, "On Hold");
            assert_eq!(task.title, "Write");
            assert_eq!(task.priority, Priority::Medium);
            assert!(task.created_at.is_some());
            assert_eq!(
                move_task(&mut doc, &pid, &t, "Limbo"),
                Err(ValidationError::UnknownColumn("Limbo".into()))
            );
            assert_eq!(
                add_task(&mut doc, &pid, TaskDraft::default()),
                Err(ValidationError::Required("task title"))
            );
            edit_task(
                &mut doc,
                &pid,
                &t,
                TaskDraft {
                    title: "Rewrite".into(),
                    priority: Priority::High,
                    ..TaskDraft::default()
                },
            )
            .unwrap();
            let task = doc.project(&pid).unwrap().task(&t).unwrap();
            assert_eq!((task.title.as_str(), task.status.as_str()), ("Rewrite", "On Hold"));
            assert_eq!(delete_task(&mut doc, &pid, &t).unwrap().priority, Priority::High);
        }

        #[test]
        fn setting_a_due_date_replaces_a_kept_raw_value() {
            let mut doc = crate::migrate::migrate(serde_json::json!({
                "projects": [{ "id": "p", "name": "P", "dueDate": "next week",
                    "tasks": [{ "id": "t", "title": "t", "dueDate": "soon" }] }]
            }))
            .unwrap();
            let pid = ProjectId::from("p");
            let due = NaiveDate::from_ymd_opt(2024, 6, 1);
            edit_project(&mut doc, &pid, ProjectDraft { name: "P".into(), due_date: due, ..ProjectDraft::default() }).unwrap();
            edit_task(
                &mut doc,
                &pid,
                &TaskId::from("t"),
                TaskDraft { title: "t".into(), due_date: due, ..TaskDraft::default() },
            )
            .unwrap();
            let p = doc.project(&pid).unwrap();
            assert!(!p.extra.contains_key("dueDate"));
            assert!(!p.tasks[0].extra.contains_key("dueDate"));
            let stored = serde_json::to_value(&doc).unwrap();
            assert_eq!(stored["projects"][0]["dueDate"], serde_json::json!("2024-06-01"));
            assert_eq!(stored["projects"][0]["tasks"][0]["dueDate"], serde_json::json!("2024-06-01"));
        }

        #[test]
        fn todos_toggle_and_remove() {
            let mut doc = Document::default();
            let pid = ProjectId::from(PLACEHOLDER_PROJECT_ID);
            let t = add_task(&mut doc, &pid, TaskDraft { title: "a".into(), ..TaskDraft::default() }).unwrap();
            let todo = add_todo(&mut doc, &pid, &t, "step").unwrap();
            assert!(toggle_todo(&mut doc, &pid, &t, &todo).unwrap());
            assert!(!toggle_todo(&mut doc, &pid, &t, &todo).unwrap());
            assert_eq!(remove_todo(&mut doc, &pid, &t, &todo).unwrap().text, "step");
            assert!(toggle_todo(&mut doc, &pid, &t, &todo).is_err());
        }

        #[test]
        fn reset_restores_defaults() {
            let (mut doc, _) = doc_with_section();
            reset_document(&mut doc);
            assert_eq!(doc, Document::default());
        }
    }
}

pub mod dashboard {
    //! The live dashboard: the in-memory document plus the gateway it is
    //! persisted through.

    use crate::actions::ValidationError;
    use crate::core::Document;
    use crate::migrate;
    use crate::storage::{self, CorruptData, Gateway, KeyValueStore, LoadError, SaveError};
    use tracing::{debug, info, warn};

    #[derive(Debug, thiserror::Error)]
    pub enum ImportError {
        #[error("import failed, dashboard left unchanged")]
        Corrupt(#[from] CorruptData),
    }

    /// Outcome of an applied change. The in-memory document is updated even when
    /// `saved` is an error; the caller decides how to surface it.
    #[derive(Debug)]
    #[must_use]
    pub struct Commit<T> {
        pub value: T,
        pub saved: Result<(), SaveError>,
    }

    impl<T> Commit<T> {
        /// Drop the value, keeping only the save outcome.
        pub fn saved(self) -> Result<(), SaveError> {
            self.saved
        }
    }

    #[derive(Debug)]
    pub struct Dashboard<S> {
        doc: Document,
        gateway: Gateway<S>,
    }

    impl<S: KeyValueStore> Dashboard<S> {
        /// Load (and migrate) the stored document, then write it back so the
        /// stored copy is in the current schema.
        pub fn open(mut gateway: Gateway<S>) -> Result<Self, LoadError> {
            let doc = gateway.load()?;
            if let Err(err) = gateway.save(&doc) {
                warn!(error = ?err, "could not store migrated dashboard data");
            }
            Ok(Self { doc, gateway })
        }

        /// Start from the default document without reading the store. Used to get
        /// out of unreadable stored data through `reset` or `import_json`; nothing
        /// is written until one of them runs.
        pub fn recover(gateway: Gateway<S>) -> Self {
            warn!("starting without stored dashboard data");
            Self {
                doc: Document::default(),
                gateway,
            }
        }

        pub fn document(&self) -> &Document {
            &self.doc
        }

        pub fn gateway(&self) -> &Gateway<S> {
            &self.gateway
        }

        pub fn gateway_mut(&mut self) -> &mut Gateway<S> {
            &mut self.gateway
        }

        pub fn into_gateway(self) -> Gateway<S> {
            self.gateway
        }

        /// Apply `change` to a copy of the document. On success the copy replaces
        /// the document and is saved; on a validation error nothing changes.
        pub fn mutate<T>(
            &mut self,
            change: impl FnOnce(&mut Document) -> Result<T, ValidationError>,
        ) -> Result<Commit<T>, ValidationError> {
            let mut next = self.doc.clone();
            let value = change(&mut next)?;
            let sanitized = migrate::sanitize_urls(&mut next);
            if sanitized > 0 {
                warn!(sanitized, "replaced unsafe bookmark urls");
            }
            self.doc = next;
            let saved = self.gateway.save(&self.doc);
            Ok(Commit { value, saved })
        }

        /// Replace the document with imported JSON after migrating it.
        pub fn import_json(&mut self, text: &str) -> Result<Commit<()>, ImportError> {
            let doc = storage::parse_document(text)?;
            info!(
                sections = doc.sections.len(),
                projects = doc.projects.len(),
                "imported dashboard data"
            );
            self.doc = doc;
            let saved = self.gateway.save(&self.doc);
            Ok(Commit { value: (), saved })
        }

        pub fn export_json(&self) -> Result<String, serde_json::Error> {
            serde_json::to_string_pretty(&self.doc)
        }

        /// Wipe stored data and start over from the default document.
        pub fn reset(&mut self) -> Commit<()> {
            if let Err(err) = self.gateway.clear() {
                warn!(error = ?err, "could not clear stored dashboard data");
            }
            self.doc = Document::default();
            debug!("dashboard reset to defaults");
            let saved = self.gateway.save(&self.doc);
            Commit { value: (), saved }
        }
    }

}

pub mod config {
    //! Where the dashboard lives on disk and how large it may grow.

    use crate::dashboard::Dashboard;
    use crate::storage::{DEFAULT_QUOTA_BYTES, FileStore, Gateway, LoadError};
    use std::path::{Path, PathBuf};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Config {
        pub store_dir: PathBuf,
        /// `None` means unlimited.
        pub quota_bytes: Option<usize>,
    }

    impl Config {
        pub fn new(store_dir: impl Into<PathBuf>) -> Self {
            Self {
                store_dir: store_dir.into(),
                quota_bytes: Some(DEFAULT_QUOTA_BYTES),
            }
        }

        /// A quota of zero disables the limit.
        pub fn with_quota(mut self, quota_bytes: usize) -> Self {
            self.quota_bytes = (quota_bytes > 0).then_some(quota_bytes);
            self
        }

        /// `$XDG_DATA_HOME/dashboard`, then `$HOME/.local/share/dashboard`,
        /// then `.dashboard` in the working directory.
        pub fn default_store_dir() -> PathBuf {
            Self::store_dir_from(
                std::env::var_os("XDG_DATA_HOME").map(PathBuf::from).as_deref(),
                std::env::var_os("HOME").map(PathBuf::from).as_deref(),
            )
        }

        fn store_dir_from(data_home: Option<&Path>, home: Option<&Path>) -> PathBuf {
            match (data_home, home) {
                (Some(data), _) if !data.as_os_str().is_empty() => data.join("dashboard"),
                (_, Some(home)) if !home.as_os_str().is_empty() => home.join(".local/share/dashboard"),
                _ => PathBuf::from(".dashboard"),
            }
        }

        pub fn gateway(&self) -> Gateway<FileStore> {
            Gateway::new(FileStore::new(&self.store_dir).with_quota(self.quota_bytes))
        }

        pub fn open(&self) -> Result<Dashboard<FileStore>, LoadError> {
            Dashboard::open(self.gateway())
        }
    }

    impl Default for Config {
        fn default() -> Self {
            Self::new(Self::default_store_dir())
        }
    }

}
