use std::{
    fs,
    io::{self, Read, Write},
    path::PathBuf,
};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand, ValueEnum};
use dashboard::actions::{self, BookmarkDraft, ProjectDraft, TaskDraft, ThemeColor};
use dashboard::config::Config;
use dashboard::core::{BookmarkId, Document, Priority, Project, ProjectId, SectionId, TaskId, Theme, TodoId};
use dashboard::dashboard::{Commit, Dashboard};
use dashboard::migrate::feed_name_from_url;
use dashboard::query::{self, EventKind, ProjectFilter, ProjectSortKey, SortState, TaskFilter, TaskSortKey};
use dashboard::storage::{FileStore, LoadError};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "dashboard",
    about = "Personal dashboard data: bookmarks, projects, tasks and feeds",
    version
)]
struct Cli {
    /// Directory holding the dashboard data.
    #[arg(long, global = true, env = "DASHBOARD_STORE")]
    store: Option<PathBuf>,
    /// Storage quota in bytes (0 disables it).
    #[arg(long, global = true, env = "DASHBOARD_QUOTA")]
    quota: Option<usize>,
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print a short overview of the dashboard.
    Show,

    /// Write the whole dashboard as JSON.
    Export(ExportArgs),

    /// Replace the dashboard with a JSON export.
    Import(ImportArgs),

    /// Delete all data and start from the defaults.
    Reset(ResetArgs),

    /// Bookmarks inside sections.
    #[command(subcommand)]
    Bookmarks(BookmarkCommand),

    /// Bookmark sections.
    #[command(subcommand)]
    Sections(SectionCommand),

    /// Projects on the project board.
    #[command(subcommand)]
    Projects(ProjectCommand),

    /// Tasks of a project's kanban board.
    #[command(subcommand)]
    Tasks(TaskCommand),

    /// Task board columns of a project.
    #[command(subcommand)]
    Columns(ColumnCommand),

    /// Project and task due dates.
    Calendar(CalendarArgs),

    /// News feed sources.
    #[command(subcommand)]
    Feeds(FeedCommand),

    /// Followed subreddits.
    #[command(subcommand)]
    Subs(SubCommand),

    /// Select a theme or set a custom theme color.
    Theme(ThemeArgs),
}

#[derive(Debug, Args)]
struct ExportArgs {
    /// Write to this file instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ImportArgs {
    /// JSON file to import, or `-` for stdin.
    input: PathBuf,
}

#[derive(Debug, Args)]
struct ResetArgs {
    /// Confirm that all data should be deleted.
    #[arg(long)]
    yes: bool,
}

#[derive(Debug, Subcommand)]
enum BookmarkCommand {
    /// List bookmarks, optionally filtered by a search query.
    List {
        #[arg(long)]
        query: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Add a bookmark to a section.
    Add(BookmarkArgs),
    /// Replace a bookmark's fields.
    Edit {
        id: String,
        #[command(flatten)]
        fields: BookmarkFields,
    },
    /// Add a bookmark from pasted text to the first section.
    Paste {
        text: String,
        /// Name for the bookmark; derived from the host when omitted.
        #[arg(long)]
        name: Option<String>,
    },
    Delete {
        id: String,
    },
    /// Move a bookmark into a section at a position.
    Move {
        id: String,
        #[arg(long)]
        to: String,
        #[arg(long, default_value_t = usize::MAX)]
        index: usize,
    },
}

#[derive(Debug, Args)]
struct BookmarkArgs {
    /// Target section id.
    #[arg(long)]
    section: String,
    #[command(flatten)]
    fields: BookmarkFields,
}

#[derive(Debug, Args)]
struct BookmarkFields {
    #[arg(long)]
    name: String,
    #[arg(long)]
    url: String,
    #[arg(long, default_value = "")]
    notes: String,
    /// Comma-separated tags.
    #[arg(long, default_value = "")]
    tags: String,
    /// Icon as a `data:image/...` URI.
    #[arg(long)]
    icon: Option<String>,
}

impl From<BookmarkFields> for BookmarkDraft {
    fn from(fields: BookmarkFields) -> Self {
        BookmarkDraft {
            name: fields.name,
            url: fields.url,
            notes: fields.notes,
            tags: actions::split_tags(&fields.tags),
            icon: fields.icon,
        }
    }
}

#[derive(Debug, Subcommand)]
enum SectionCommand {
    List,
    Add { name: String },
    Rename { id: String, name: String },
    /// Delete a section and its bookmarks.
    Delete { id: String },
    Move { id: String, index: usize },
}

#[derive(Debug, Subcommand)]
enum ProjectCommand {
    List(ProjectListArgs),
    /// Create a project and make it active.
    Add(ProjectArgs),
    Status { id: String, status: String },
    /// Make a project the active one.
    Select { id: String },
    Delete { id: String },
}

#[derive(Debug, Args)]
struct ProjectListArgs {
    #[arg(long)]
    query: Option<String>,
    #[arg(long)]
    hide_completed: bool,
    #[arg(long)]
    hide_archived: bool,
    /// Sort key; repeat to toggle the direction.
    #[arg(long, value_enum)]
    sort: Vec<ProjectSortArg>,
    #[arg(long)]
    json: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ProjectSortArg {
    Name,
    Status,
    Due,
    Progress,
    Tasks,
}

impl From<ProjectSortArg> for ProjectSortKey {
    fn from(arg: ProjectSortArg) -> Self {
        match arg {
            ProjectSortArg::Name => ProjectSortKey::Name,
            ProjectSortArg::Status => ProjectSortKey::Status,
            ProjectSortArg::Due => ProjectSortKey::DueDate,
            ProjectSortArg::Progress => ProjectSortKey::Progress,
            ProjectSortArg::Tasks => ProjectSortKey::TaskCount,
        }
    }
}

#[derive(Debug, Args)]
struct ProjectArgs {
    name: String,
    #[arg(long, default_value = "")]
    description: String,
    #[arg(long)]
    status: Option<String>,
    /// Due date (YYYY-MM-DD).
    #[arg(long)]
    due: Option<NaiveDate>,
    #[arg(long)]
    folder: Option<String>,
    /// Comma-separated tags.
    #[arg(long, default_value = "")]
    tags: String,
}

#[derive(Debug, Subcommand)]
enum TaskCommand {
    List(TaskListArgs),
    Add(TaskArgs),
    /// Move a task to another board column.
    Move {
        task: String,
        column: String,
        #[arg(long)]
        project: Option<String>,
    },
    Delete {
        task: String,
        #[arg(long)]
        project: Option<String>,
    },
    /// Add a todo item to a task.
    Todo {
        task: String,
        text: String,
        #[arg(long)]
        project: Option<String>,
    },
    /// Toggle a todo item.
    Toggle {
        task: String,
        todo: String,
        #[arg(long)]
        project: Option<String>,
    },
}

#[derive(Debug, Args)]
struct TaskListArgs {
    /// Project id; defaults to the active project.
    #[arg(long)]
    project: Option<String>,
    #[arg(long)]
    query: Option<String>,
    #[arg(long)]
    hide_completed: bool,
    /// Sort key; repeat to toggle the direction.
    #[arg(long, value_enum)]
    sort: Vec<TaskSortArg>,
    #[arg(long)]
    json: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum TaskSortArg {
    Title,
    Status,
    Priority,
    Due,
    Progress,
}

impl From<TaskSortArg> for TaskSortKey {
    fn from(arg: TaskSortArg) -> Self {
        match arg {
            TaskSortArg::Title => TaskSortKey::Title,
            TaskSortArg::Status => TaskSortKey::Status,
            TaskSortArg::Priority => TaskSortKey::Priority,
            TaskSortArg::Due => TaskSortKey::DueDate,
            TaskSortArg::Progress => TaskSortKey::Progress,
        }
    }
}

#[derive(Debug, Args)]
struct TaskArgs {
    title: String,
    #[arg(long)]
    project: Option<String>,
    #[arg(long)]
    status: Option<String>,
    /// low, medium, high or critical.
    #[arg(long, default_value = "medium")]
    priority: Priority,
    /// Due date (YYYY-MM-DD).
    #[arg(long)]
    due: Option<NaiveDate>,
    #[arg(long, default_value = "")]
    notes: String,
    /// Comma-separated tags.
    #[arg(long, default_value = "")]
    tags: String,
}

#[derive(Debug, Subcommand)]
enum ColumnCommand {
    Add {
        name: String,
        #[arg(long)]
        project: Option<String>,
    },
    /// Remove a column; its tasks move to the first remaining column.
    Remove {
        name: String,
        #[arg(long)]
        project: Option<String>,
    },
    /// Put the named columns first, in this order.
    Order {
        #[arg(required = true)]
        columns: Vec<String>,
        #[arg(long)]
        project: Option<String>,
    },
}

#[derive(Debug, Args)]
struct CalendarArgs {
    /// Inclusive start date (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    from: Option<NaiveDate>,
    /// Inclusive end date (YYYY-MM-DD). Defaults to 30 days after the start.
    #[arg(long)]
    to: Option<NaiveDate>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Subcommand)]
enum FeedCommand {
    List,
    Add { name: String, url: String },
    Rename { url: String, name: String },
    Remove { url: String },
}

#[derive(Debug, Subcommand)]
enum SubCommand {
    List,
    Add { name: String },
    Remove { name: String },
}

#[derive(Debug, Args)]
struct ThemeArgs {
    /// Theme name (dark, light, custom, ...). Omit to print the current theme.
    name: Option<String>,
    /// Custom color as `key=#rrggbb` (bgPrimary, bgSecondary, bgTertiary, textPrimary, accent).
    #[arg(long = "color")]
    colors: Vec<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let stdout = io::stdout();
    run(cli, &mut stdout.lock())
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "dashboard=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn config_from(store: Option<PathBuf>, quota: Option<usize>) -> Config {
    let config = Config::new(store.unwrap_or_else(Config::default_store_dir));
    match quota {
        Some(quota) => config.with_quota(quota),
        None => config,
    }
}

fn run(cli: Cli, out: &mut impl Write) -> Result<()> {
    let config = config_from(cli.store, cli.quota);
    debug!(store = ?config.store_dir, "opening dashboard");
    let replaces_stored = matches!(cli.command, Commands::Reset(_) | Commands::Import(_));
    let mut dash = match config.open() {
        Ok(dash) => dash,
        Err(LoadError::Corrupt(err)) if replaces_stored => {
            eprintln!(
                "warning: {:#}; it will be replaced",
                anyhow::Error::new(LoadError::Corrupt(err))
            );
            Dashboard::recover(config.gateway())
        }
        Err(err) => {
            return Err(err).with_context(|| format!("opening dashboard in {:?}", config.store_dir));
        }
    };
    match cli.command {
        Commands::Show => handle_show(&dash, out),
        Commands::Export(args) => handle_export(&dash, args, out),
        Commands::Import(args) => handle_import(&mut dash, args, out),
        Commands::Reset(args) => handle_reset(&mut dash, args, out),
        Commands::Bookmarks(cmd) => handle_bookmarks(&mut dash, cmd, out),
        Commands::Sections(cmd) => handle_sections(&mut dash, cmd, out),
        Commands::Projects(cmd) => handle_projects(&mut dash, cmd, out),
        Commands::Tasks(cmd) => handle_tasks(&mut dash, cmd, out),
        Commands::Columns(cmd) => handle_columns(&mut dash, cmd, out),
        Commands::Calendar(args) => handle_calendar(&dash, args, out),
        Commands::Feeds(cmd) => handle_feeds(&mut dash, cmd, out),
        Commands::Subs(cmd) => handle_subs(&mut dash, cmd, out),
        Commands::Theme(args) => handle_theme(&mut dash, args, out),
    }
}

/// The change is applied either way; a failed save is reported, not fatal.
fn finish<T>(commit: Commit<T>) -> T {
    if let Err(err) = commit.saved {
        eprintln!("warning: {:#}", anyhow::Error::new(err));
    }
    commit.value
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn project_id(doc: &Document, given: Option<String>) -> Result<ProjectId> {
    match given {
        Some(id) => Ok(ProjectId::from(id)),
        None => doc
            .active_project()
            .map(|p| p.id.clone())
            .context("dashboard has no projects"),
    }
}

fn toggled<K: Copy + PartialEq>(keys: impl IntoIterator<Item = K>) -> SortState<K> {
    let mut sort = SortState::default();
    for key in keys {
        sort.select(key);
    }
    sort
}

fn handle_show(dash: &Dashboard<FileStore>, out: &mut impl Write) -> Result<()> {
    let doc = dash.document();
    let today = today();
    writeln!(
        out,
        "{} sections, {} bookmarks, {} projects",
        doc.sections.len(),
        doc.bookmarks().count(),
        doc.projects.len()
    )?;
    if let Some(project) = doc.active_project() {
        let progress = query::project_progress(project);
        writeln!(
            out,
            "active: {} [{}] {}% ({}/{} tasks), {} overdue",
            project.name,
            project.status,
            progress.percent(),
            progress.done,
            progress.total,
            query::overdue_task_count(project, today)
        )?;
        if let Some(task) = query::next_due_task(project, today) {
            if let Some(due) = task.due_date {
                writeln!(out, "next due: {} on {due}", task.title)?;
            }
        }
    }
    writeln!(
        out,
        "{} feeds, {} subreddits, theme {}",
        doc.news_feeds.len(),
        doc.reddit_subs.len(),
        doc.theme
    )?;
    Ok(())
}

fn handle_export(dash: &Dashboard<FileStore>, args: ExportArgs, out: &mut impl Write) -> Result<()> {
    let json = dash.export_json().context("serializing dashboard")?;
    match args.output {
        Some(path) => fs::write(&path, json + "\n").with_context(|| format!("writing {:?}", path))?,
        None => writeln!(out, "{json}")?,
    }
    Ok(())
}

fn handle_import(dash: &mut Dashboard<FileStore>, args: ImportArgs, out: &mut impl Write) -> Result<()> {
    let text = if args.input.as_os_str() == "-" {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf).context("reading stdin")?;
        buf
    } else {
        fs::read_to_string(&args.input).with_context(|| format!("reading {:?}", args.input))?
    };
    finish(dash.import_json(&text)?);
    let doc = dash.document();
    writeln!(
        out,
        "imported {} sections and {} projects",
        doc.sections.len(),
        doc.projects.len()
    )?;
    Ok(())
}

fn handle_reset(dash: &mut Dashboard<FileStore>, args: ResetArgs, out: &mut impl Write) -> Result<()> {
    if !args.yes {
        anyhow::bail!("reset deletes all dashboard data; pass --yes to confirm");
    }
    finish(dash.reset());
    writeln!(out, "dashboard reset to defaults")?;
    Ok(())
}

fn handle_bookmarks(dash: &mut Dashboard<FileStore>, cmd: BookmarkCommand, out: &mut impl Write) -> Result<()> {
    match cmd {
        BookmarkCommand::List { query, json } => {
            let doc = dash.document();
            let matches = query::search_bookmarks(&doc.sections, query.as_deref().unwrap_or(""));
            if json {
                let value: Vec<_> = matches
                    .iter()
                    .map(|m| serde_json::json!({ "section": m.section.name, "bookmarks": m.bookmarks }))
                    .collect();
                writeln!(out, "{}", serde_json::to_string_pretty(&value)?)?;
                return Ok(());
            }
            for m in matches {
                writeln!(out, "{} ({})", m.section.name, m.section.id)?;
                for b in m.bookmarks {
                    let tags = if b.tags.is_empty() {
                        String::new()
                    } else {
                        format!(" [{}]", b.tags.join(", "))
                    };
                    writeln!(out, "  {}  {} <{}>{tags}", b.id, b.name, b.url)?;
                }
            }
        }
        BookmarkCommand::Add(args) => {
            let section = SectionId::from(args.section);
            let id = finish(dash.mutate(|doc| actions::add_bookmark(doc, &section, args.fields.into()))?);
            writeln!(out, "added bookmark {id}")?;
        }
        BookmarkCommand::Edit { id, fields } => {
            let id = BookmarkId::from(id);
            finish(dash.mutate(|doc| actions::edit_bookmark(doc, &id, fields.into()))?);
            writeln!(out, "updated bookmark {id}")?;
        }
        BookmarkCommand::Paste { text, name } => {
            let (section, mut draft) = actions::paste_bookmark_draft(dash.document(), &text)?;
            draft.name = name.unwrap_or_else(|| feed_name_from_url(&draft.url));
            let id = finish(dash.mutate(|doc| actions::add_bookmark(doc, &section, draft))?);
            writeln!(out, "added bookmark {id} to {section}")?;
        }
        BookmarkCommand::Delete { id } => {
            let removed = finish(dash.mutate(|doc| actions::delete_bookmark(doc, &BookmarkId::from(id)))?);
            writeln!(out, "deleted bookmark {}", removed.name)?;
        }
        BookmarkCommand::Move { id, to, index } => {
            let id = BookmarkId::from(id);
            let to = SectionId::from(to);
            finish(dash.mutate(|doc| actions::move_bookmark(doc, &id, &to, index))?);
            writeln!(out, "moved bookmark {id} to {to}")?;
        }
    }
    Ok(())
}

fn handle_sections(dash: &mut Dashboard<FileStore>, cmd: SectionCommand, out: &mut impl Write) -> Result<()> {
    match cmd {
        SectionCommand::List => {
            for s in &dash.document().sections {
                writeln!(out, "{}  {} ({} bookmarks)", s.id, s.name, s.bookmarks.len())?;
            }
        }
        SectionCommand::Add { name } => {
            let id = finish(dash.mutate(|doc| actions::add_section(doc, &name))?);
            writeln!(out, "added section {id}")?;
        }
        SectionCommand::Rename { id, name } => {
            finish(dash.mutate(|doc| actions::rename_section(doc, &SectionId::from(id), &name))?);
        }
        SectionCommand::Delete { id } => {
            let removed = finish(dash.mutate(|doc| actions::delete_section(doc, &SectionId::from(id)))?);
            writeln!(
                out,
                "deleted section {} and {} bookmarks",
                removed.name,
                removed.bookmarks.len()
            )?;
        }
        SectionCommand::Move { id, index } => {
            finish(dash.mutate(|doc| actions::move_section(doc, &SectionId::from(id), index))?);
        }
    }
    Ok(())
}

fn write_project_line(out: &mut impl Write, project: &Project, active: bool, today: NaiveDate) -> Result<()> {
    let progress = query::project_progress(project);
    let marker = if active { "*" } else { " " };
    let due = project.due_date.map(|d| format!(" due {d}")).unwrap_or_default();
    let overdue = query::overdue_task_count(project, today);
    let overdue = if overdue > 0 {
        format!(", {overdue} overdue")
    } else {
        String::new()
    };
    writeln!(
        out,
        "{marker} {}  {} [{}] {}%{due}{overdue}",
        project.id,
        project.name,
        project.status,
        progress.percent()
    )?;
    Ok(())
}

fn handle_projects(dash: &mut Dashboard<FileStore>, cmd: ProjectCommand, out: &mut impl Write) -> Result<()> {
    match cmd {
        ProjectCommand::List(args) => {
            let doc = dash.document();
            let filter = ProjectFilter {
                query: args.query.unwrap_or_default(),
                hide_completed: args.hide_completed,
                hide_archived: args.hide_archived,
            };
            let sort = toggled(args.sort.into_iter().map(ProjectSortKey::from));
            let projects = query::sort_projects(query::filter_projects(&doc.projects, &filter), &sort);
            if args.json {
                writeln!(out, "{}", serde_json::to_string_pretty(&projects)?)?;
                return Ok(());
            }
            let active = doc.active_project().map(|p| p.id.clone());
            let today = today();
            for project in projects {
                write_project_line(out, project, active.as_ref() == Some(&project.id), today)?;
            }
        }
        ProjectCommand::Add(args) => {
            let draft = ProjectDraft {
                name: args.name,
                description: args.description,
                notes: String::new(),
                status: args.status,
                due_date: args.due,
                folder_path: args.folder,
                tags: actions::split_tags(&args.tags),
            };
            let id = finish(dash.mutate(|doc| actions::create_project(doc, draft))?);
            writeln!(out, "created project {id}")?;
        }
        ProjectCommand::Status { id, status } => {
            finish(dash.mutate(|doc| actions::set_project_status(doc, &ProjectId::from(id), &status))?);
        }
        ProjectCommand::Select { id } => {
            finish(dash.mutate(|doc| actions::select_project(doc, &ProjectId::from(id)))?);
        }
        ProjectCommand::Delete { id } => {
            let removed = finish(dash.mutate(|doc| actions::delete_project(doc, &ProjectId::from(id)))?);
            writeln!(out, "deleted project {}", removed.name)?;
        }
    }
    Ok(())
}

fn handle_tasks(dash: &mut Dashboard<FileStore>, cmd: TaskCommand, out: &mut impl Write) -> Result<()> {
    match cmd {
        TaskCommand::List(args) => {
            let doc = dash.document();
            let pid = project_id(doc, args.project)?;
            let project = doc.project(&pid).with_context(|| format!("no project with id {pid}"))?;
            let filter = TaskFilter {
                query: args.query.unwrap_or_default(),
                hide_completed: args.hide_completed,
            };
            let sort = toggled(args.sort.into_iter().map(TaskSortKey::from));
            let tasks = query::sort_tasks(query::filter_tasks(&project.tasks, &filter), &sort);
            if args.json {
                writeln!(out, "{}", serde_json::to_string_pretty(&tasks)?)?;
                return Ok(());
            }
            let today = today();
            for task in tasks {
                let progress = query::task_progress(task);
                let todos = if progress.total > 0 {
                    format!(" {}/{}", progress.done, progress.total)
                } else {
                    String::new()
                };
                let due = task.due_date.map(|d| format!(" due {d}")).unwrap_or_default();
                let overdue = if query::is_overdue(task.due_date, &task.status, today) {
                    " OVERDUE"
                } else {
                    ""
                };
                writeln!(
                    out,
                    "{}  {} [{}] {}{todos}{due}{overdue}",
                    task.id, task.title, task.status, task.priority
                )?;
            }
        }
        TaskCommand::Add(args) => {
            let pid = project_id(dash.document(), args.project)?;
            let draft = TaskDraft {
                title: args.title,
                notes: args.notes,
                status: args.status,
                priority: args.priority,
                due_date: args.due,
                tags: args.tags,
                folder_path: None,
            };
            let id = finish(dash.mutate(|doc| actions::add_task(doc, &pid, draft))?);
            writeln!(out, "added task {id}")?;
        }
        TaskCommand::Move { task, column, project } => {
            let pid = project_id(dash.document(), project)?;
            finish(dash.mutate(|doc| actions::move_task(doc, &pid, &TaskId::from(task), &column))?);
        }
        TaskCommand::Delete { task, project } => {
            let pid = project_id(dash.document(), project)?;
            let removed = finish(dash.mutate(|doc| actions::delete_task(doc, &pid, &TaskId::from(task)))?);
            writeln!(out, "deleted task {}", removed.title)?;
        }
        TaskCommand::Todo { task, text, project } => {
            let pid = project_id(dash.document(), project)?;
            let id = finish(dash.mutate(|doc| actions::add_todo(doc, &pid, &TaskId::from(task), &text))?);
            writeln!(out, "added todo {id}")?;
        }
        TaskCommand::Toggle { task, todo, project } => {
            let pid = project_id(dash.document(), project)?;
            let done = finish(dash.mutate(|doc| {
                actions::toggle_todo(doc, &pid, &TaskId::from(task), &TodoId::from(todo))
            })?);
            writeln!(out, "{}", if done { "done" } else { "not done" })?;
        }
    }
    Ok(())
}

fn handle_columns(dash: &mut Dashboard<FileStore>, cmd: ColumnCommand, out: &mut impl Write) -> Result<()> {
    match cmd {
        ColumnCommand::Add { name, project } => {
            let pid = project_id(dash.document(), project)?;
            finish(dash.mutate(|doc| actions::add_column(doc, &pid, &name))?);
        }
        ColumnCommand::Remove { name, project } => {
            let pid = project_id(dash.document(), project)?;
            let moved = finish(dash.mutate(|doc| actions::remove_column(doc, &pid, &name))?);
            writeln!(out, "removed column {name}; moved {moved} task(s)")?;
        }
        ColumnCommand::Order { columns, project } => {
            let pid = project_id(dash.document(), project)?;
            finish(dash.mutate(|doc| actions::reorder_columns(doc, &pid, &columns))?);
        }
    }
    Ok(())
}

fn handle_calendar(dash: &Dashboard<FileStore>, args: CalendarArgs, out: &mut impl Write) -> Result<()> {
    let today = today();
    let from = args.from.unwrap_or(today);
    let to = args.to.unwrap_or(from + chrono::Days::new(30));
    if to < from {
        anyhow::bail!("--to ({to}) is before --from ({from})");
    }
    let events = query::calendar_events(&dash.document().projects, today);
    let events = query::events_between(&events, from, to);

    if args.json {
        #[derive(serde::Serialize)]
        struct JsonEvent<'a> {
            kind: &'static str,
            date: NaiveDate,
            title: &'a str,
            status: &'a str,
            project: &'a str,
            overdue: bool,
        }
        let json: Vec<_> = events
            .iter()
            .map(|e| JsonEvent {
                kind: match e.kind {
                    EventKind::Project => "project",
                    EventKind::Task => "task",
                },
                date: e.due_date,
                title: e.title,
                status: e.status,
                project: &e.project.name,
                overdue: e.overdue,
            })
            .collect();
        writeln!(out, "{}", serde_json::to_string_pretty(&json)?)?;
        return Ok(());
    }

    for e in events {
        let kind = match e.kind {
            EventKind::Project => "project",
            EventKind::Task => "task",
        };
        let overdue = if e.overdue { " OVERDUE" } else { "" };
        writeln!(out, "{}  {kind:<7} {} [{}]{overdue}", e.due_date, e.title, e.status)?;
    }
    Ok(())
}

fn handle_feeds(dash: &mut Dashboard<FileStore>, cmd: FeedCommand, out: &mut impl Write) -> Result<()> {
    match cmd {
        FeedCommand::List => {
            for feed in &dash.document().news_feeds {
                writeln!(out, "{}  <{}>", feed.name, feed.url)?;
            }
        }
        FeedCommand::Add { name, url } => {
            finish(dash.mutate(|doc| actions::add_feed(doc, &name, &url))?);
        }
        FeedCommand::Rename { url, name } => {
            finish(dash.mutate(|doc| actions::rename_feed(doc, &url, &name))?);
        }
        FeedCommand::Remove { url } => {
            let removed = finish(dash.mutate(|doc| actions::remove_feed(doc, &url))?);
            writeln!(out, "removed feed {}", removed.name)?;
        }
    }
    Ok(())
}

fn handle_subs(dash: &mut Dashboard<FileStore>, cmd: SubCommand, out: &mut impl Write) -> Result<()> {
    match cmd {
        SubCommand::List => {
            for sub in &dash.document().reddit_subs {
                writeln!(out, "r/{sub}")?;
            }
        }
        SubCommand::Add { name } => {
            let name = finish(dash.mutate(|doc| actions::add_subreddit(doc, &name))?);
            writeln!(out, "following r/{name}")?;
        }
        SubCommand::Remove { name } => {
            finish(dash.mutate(|doc| actions::remove_subreddit(doc, &name))?);
        }
    }
    Ok(())
}

fn parse_color(assignment: &str) -> Result<(ThemeColor, String)> {
    let (key, value) = assignment
        .split_once('=')
        .with_context(|| format!("expected key=value, got {assignment:?}"))?;
    Ok((key.parse()?, value.to_string()))
}

fn handle_theme(dash: &mut Dashboard<FileStore>, args: ThemeArgs, out: &mut impl Write) -> Result<()> {
    let colors = args
        .colors
        .iter()
        .map(|c| parse_color(c))
        .collect::<Result<Vec<_>>>()?;
    if args.name.is_none() && colors.is_empty() {
        let doc = dash.document();
        writeln!(out, "{}", doc.theme)?;
        if doc.theme == Theme::Custom {
            writeln!(out, "{}", serde_json::to_string_pretty(&doc.custom_theme)?)?;
        }
        return Ok(());
    }
    finish(dash.mutate(|doc| {
        if let Some(name) = args.name {
            actions::set_theme(doc, Theme::from(name));
        }
        for (key, value) in &colors {
            actions::set_custom_color(doc, *key, value)?;
        }
        Ok(())
    })?);
    writeln!(out, "theme {}", dash.document().theme)?;
    Ok(())
}
