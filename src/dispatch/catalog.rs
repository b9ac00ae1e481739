//! Closed tool capability catalog
//!
//! Every tool maps to a fixed table of declared methods. Dispatch looks a
//! method up here before anything touches the network.

use serde::Serialize;

use crate::connections::ToolType;

/// Production readiness of a declared method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    /// Forwarded to the gateway
    Available,
    /// Declared but not yet served; dispatch returns a sentinel
    InDevelopment,
}

/// One declared method of a tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MethodSpec {
    /// Method name as passed to `invoke`
    pub name: &'static str,
    /// Readiness flag
    pub availability: Availability,
    /// Provider scopes, any one of which permits the call
    pub scopes: &'static [&'static str],
}

const fn ready(name: &'static str, scopes: &'static [&'static str]) -> MethodSpec {
    MethodSpec {
        name,
        availability: Availability::Available,
        scopes,
    }
}

const fn wip(name: &'static str, scopes: &'static [&'static str]) -> MethodSpec {
    MethodSpec {
        name,
        availability: Availability::InDevelopment,
        scopes,
    }
}

const NONE: &[&str] = &[];

const GMAIL_READ: &[&str] = &["gmail.readonly", "gmail.modify", "https://mail.google.com/"];
const GMAIL_SEND: &[&str] = &[
    "gmail.send",
    "gmail.compose",
    "gmail.modify",
    "https://mail.google.com/",
];
const GMAIL_MODIFY: &[&str] = &["gmail.modify", "https://mail.google.com/"];
const GMAIL_LABELS: &[&str] = &["gmail.labels", "gmail.modify", "https://mail.google.com/"];
const DRIVE_READ: &[&str] = &["drive.readonly", "drive", "drive.file"];
const DRIVE_WRITE: &[&str] = &["drive", "drive.file"];
const DOCS_READ: &[&str] = &["documents.readonly", "documents"];
const DOCS_WRITE: &[&str] = &["documents"];
const SHEETS_READ: &[&str] = &["spreadsheets.readonly", "spreadsheets"];
const SHEETS_WRITE: &[&str] = &["spreadsheets"];
const SLIDES_READ: &[&str] = &["presentations.readonly", "presentations"];
const SLIDES_WRITE: &[&str] = &["presentations"];
const CALENDAR_READ: &[&str] = &["calendar.readonly", "calendar.events", "calendar"];
const CALENDAR_WRITE: &[&str] = &["calendar.events", "calendar"];
const SLACK_READ: &[&str] = &["channels:read"];
const SLACK_HISTORY: &[&str] = &["channels:history"];
const SLACK_WRITE: &[&str] = &["chat:write"];
const SLACK_USERS: &[&str] = &["users:read"];
const SLACK_FILES: &[&str] = &["files:write"];
const SLACK_REACTIONS: &[&str] = &["reactions:write"];
const GITHUB_REPO: &[&str] = &["repo", "public_repo"];

const GMAIL: &[MethodSpec] = &[
    ready("get_emails", GMAIL_READ),
    ready("send_email", GMAIL_SEND),
    ready("get_email", GMAIL_READ),
    ready("delete_email", GMAIL_MODIFY),
    ready("create_draft", GMAIL_SEND),
    ready("get_labels", GMAIL_READ),
    wip("create_label", GMAIL_LABELS),
];

const SLACK: &[MethodSpec] = &[
    ready("get_channels", SLACK_READ),
    ready("post_message", SLACK_WRITE),
    ready("get_messages", SLACK_HISTORY),
    ready("get_users", SLACK_USERS),
    wip("upload_file", SLACK_FILES),
    wip("add_reaction", SLACK_REACTIONS),
];

const NOTION: &[MethodSpec] = &[
    ready("list_pages", NONE),
    ready("get_page", NONE),
    ready("create_page", NONE),
    ready("update_page", NONE),
    ready("search", NONE),
    ready("list_databases", NONE),
    wip("query_database", NONE),
];

const GITHUB: &[MethodSpec] = &[
    ready("list_repos", GITHUB_REPO),
    ready("get_repo", GITHUB_REPO),
    ready("create_issue", GITHUB_REPO),
    ready("list_issues", GITHUB_REPO),
    wip("create_pr", GITHUB_REPO),
    wip("list_prs", GITHUB_REPO),
    ready("get_file", GITHUB_REPO),
];

const GOOGLE_DRIVE: &[MethodSpec] = &[
    ready("list_files", DRIVE_READ),
    ready("get_file", DRIVE_READ),
    ready("create_file", DRIVE_WRITE),
    ready("update_file", DRIVE_WRITE),
    ready("delete_file", DRIVE_WRITE),
    ready("search_files", DRIVE_READ),
    wip("share_file", DRIVE_WRITE),
];

const GOOGLE_DOCS: &[MethodSpec] = &[
    ready("get_document", DOCS_READ),
    ready("create_document", DOCS_WRITE),
    ready("update_document", DOCS_WRITE),
    ready("append_text", DOCS_WRITE),
];

const GOOGLE_SHEETS: &[MethodSpec] = &[
    ready("get_spreadsheet", SHEETS_READ),
    ready("create_spreadsheet", SHEETS_WRITE),
    ready("get_values", SHEETS_READ),
    ready("update_values", SHEETS_WRITE),
    ready("append_values", SHEETS_WRITE),
];

const GOOGLE_SLIDES: &[MethodSpec] = &[
    ready("get_presentation", SLIDES_READ),
    ready("create_presentation", SLIDES_WRITE),
    wip("add_slide", SLIDES_WRITE),
    wip("update_slide", SLIDES_WRITE),
];

const GOOGLE_CALENDAR: &[MethodSpec] = &[
    ready("list_events", CALENDAR_READ),
    ready("get_event", CALENDAR_READ),
    ready("create_event", CALENDAR_WRITE),
    ready("update_event", CALENDAR_WRITE),
    ready("delete_event", CALENDAR_WRITE),
];

const GOOGLE_MEET: &[MethodSpec] = &[
    wip("create_meeting", &["meetings.space.created"]),
    wip("get_meeting", &["meetings.space.readonly", "meetings.space.created"]),
];

const GOOGLE_FORMS: &[MethodSpec] = &[
    wip("get_form", &["forms.body.readonly", "forms.body"]),
    wip("list_responses", &["forms.responses.readonly"]),
];

const GOOGLE_CLASSROOM: &[MethodSpec] = &[
    wip("list_courses", &["classroom.courses.readonly", "classroom.courses"]),
    wip("list_coursework", &["classroom.coursework.me.readonly", "classroom.coursework.me"]),
];

const GOOGLE_PEOPLE: &[MethodSpec] = &[
    wip("list_contacts", &["contacts.readonly", "contacts"]),
    wip("get_profile", &["userinfo.profile"]),
];

const GOOGLE_CHAT: &[MethodSpec] = &[
    wip("list_spaces", &["chat.spaces.readonly", "chat.spaces"]),
    wip("send_message", &["chat.messages.create", "chat.messages"]),
];

const GOOGLE_TASKS: &[MethodSpec] = &[
    wip("list_tasks", &["tasks.readonly", "tasks"]),
    wip("create_task", &["tasks"]),
];

/// Declared methods of `tool`
#[must_use]
pub fn methods(tool: ToolType) -> &'static [MethodSpec] {
    match tool {
        ToolType::Gmail => GMAIL,
        ToolType::GoogleDrive => GOOGLE_DRIVE,
        ToolType::GoogleDocs => GOOGLE_DOCS,
        ToolType::GoogleSheets => GOOGLE_SHEETS,
        ToolType::GoogleSlides => GOOGLE_SLIDES,
        ToolType::GoogleCalendar => GOOGLE_CALENDAR,
        ToolType::GoogleMeet => GOOGLE_MEET,
        ToolType::GoogleForms => GOOGLE_FORMS,
        ToolType::GoogleClassroom => GOOGLE_CLASSROOM,
        ToolType::GooglePeople => GOOGLE_PEOPLE,
        ToolType::GoogleChat => GOOGLE_CHAT,
        ToolType::GoogleTasks => GOOGLE_TASKS,
        ToolType::Slack => SLACK,
        ToolType::Notion => NOTION,
        ToolType::Github => GITHUB,
    }
}

/// Look up one method
#[must_use]
pub fn lookup(tool: ToolType, method: &str) -> Option<&'static MethodSpec> {
    methods(tool).iter().find(|m| m.name == method)
}

/// Whether `granted` satisfies one of `required`
///
/// Google grants arrive as full URLs (`https://www.googleapis.com/auth/gmail.send`)
/// while the catalog names the short form, so a suffix after `/` also matches.
#[must_use]
pub fn scope_satisfied(granted: &[String], required: &[&str]) -> bool {
    required.iter().any(|req| {
        granted.iter().any(|g| {
            g == req || g.strip_suffix(req).is_some_and(|head| head.ends_with('/'))
        })
    })
}
