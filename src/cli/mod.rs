//! Command-line interface for nexapro
//!
//! This module defines the CLI structure using clap derive macros.
//! Each command family is implemented in its own submodule. Commands run on
//! a current-thread tokio runtime.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Config;
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::events::{EventDestination, EventSink, Subscription};
use crate::output::OutputOptions;
use crate::permissions::PermissionPolicy;
use crate::session::SessionContext;
use crate::store::{EntityStore, ProjectStore, StoreContext, StoreSnapshot};
use crate::task_store::TaskStore;

mod project;
mod report;
mod task;

/// How long the CLI waits for activity posts before exiting.
const ACTIVITY_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// nexapro - project and task dashboard client
///
/// Reads and edits projects and tasks on a NexaPro gateway, keeping task
/// progress, project aggregates and derived statistics consistent.
#[derive(Parser, Debug)]
#[command(name = "nexapro")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to a config file (defaults to .nexapro.toml, then the user config dir)
    #[arg(long, global = true, env = "NEXAPRO_CONFIG")]
    pub config: Option<PathBuf>,

    /// Gateway base URL, overriding the config file
    #[arg(long, global = true, env = "NEXAPRO_GATEWAY")]
    pub gateway: Option<String>,

    /// Bearer token, overriding the config file
    #[arg(long, global = true, env = "NEXAPRO_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Mirror bus notices as JSON lines to stdout (`-`) or a file
    #[arg(long, global = true)]
    pub events: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Project management
    #[command(subcommand)]
    Project(ProjectCommands),

    /// Task management
    #[command(subcommand)]
    Task(TaskCommands),

    /// Derived statistics for projects and tasks
    Stats,

    /// List users known to the gateway
    Users,
}

/// Project subcommands
#[derive(Subcommand, Debug)]
pub enum ProjectCommands {
    /// List projects
    List {
        /// Filter by status (e.g. "In Progress")
        #[arg(long)]
        status: Option<String>,

        /// Filter by priority
        #[arg(long)]
        priority: Option<String>,

        /// Free-text search
        #[arg(long)]
        search: Option<String>,
    },

    /// Show one project
    Show {
        id: i64,
    },

    /// Create a project
    New {
        /// Project name
        name: String,

        #[arg(long)]
        description: Option<String>,

        /// Planning, In Progress, Completed, On Hold
        #[arg(long)]
        status: Option<String>,

        /// Low, Medium, High
        #[arg(long)]
        priority: Option<String>,

        /// Progress percentage (0-100)
        #[arg(long)]
        progress: Option<u8>,

        /// Due date (YYYY-MM-DD)
        #[arg(long)]
        due: Option<String>,
    },

    /// Edit a project
    Edit {
        id: i64,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        status: Option<String>,

        #[arg(long)]
        priority: Option<String>,

        #[arg(long)]
        progress: Option<u8>,

        #[arg(long)]
        due: Option<String>,
    },

    /// Delete a project
    Rm {
        id: i64,
    },
}

/// Task subcommands
#[derive(Subcommand, Debug)]
pub enum TaskCommands {
    /// List tasks
    List {
        /// Only tasks of this project
        #[arg(long)]
        project: Option<i64>,

        #[arg(long)]
        status: Option<String>,

        #[arg(long)]
        priority: Option<String>,

        #[arg(long)]
        search: Option<String>,
    },

    /// Show one task
    Show {
        id: i64,
    },

    /// Create a task
    New {
        /// Task title
        title: String,

        /// Owning project id
        #[arg(long)]
        project: i64,

        #[arg(long)]
        description: Option<String>,

        /// Assignee user id
        #[arg(long)]
        assignee: Option<i64>,

        /// Todo, In Progress, Completed, Review, On hold, Cancelled
        #[arg(long)]
        status: Option<String>,

        #[arg(long)]
        priority: Option<String>,

        #[arg(long)]
        progress: Option<u8>,

        #[arg(long)]
        due: Option<String>,

        /// Tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Edit a task
    Edit {
        id: i64,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        description: Option<String>,

        /// Move the task to another project
        #[arg(long)]
        project: Option<i64>,

        #[arg(long)]
        assignee: Option<i64>,

        #[arg(long)]
        status: Option<String>,

        #[arg(long)]
        priority: Option<String>,

        #[arg(long)]
        progress: Option<u8>,

        #[arg(long)]
        due: Option<String>,

        /// Replace the tag set (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Remove every tag
        #[arg(long, conflicts_with = "tags")]
        clear_tags: bool,
    },

    /// Delete a task
    Rm {
        id: i64,
    },
}

/// Process-wide wiring shared by every command.
pub(crate) struct App {
    pub ctx: StoreContext,
    pub output: OutputOptions,
    events: Option<(EventSink, Subscription)>,
}

impl App {
    fn build(
        config_path: Option<&std::path::Path>,
        gateway: Option<String>,
        token: Option<String>,
        events: Option<&str>,
        output: OutputOptions,
    ) -> Result<Self> {
        let mut config = Config::discover(config_path)?;
        if let Some(base_url) = gateway {
            config.gateway.base_url = base_url;
        }
        if let Some(token) = token {
            config.session.token = Some(token);
        }
        config.validate()?;

        let session = SessionContext::from_config(&config.session);
        let ctx = StoreContext::from_config(&config, session)?;
        let events = match EventDestination::parse(events) {
            Some(destination) => Some((destination.open()?, ctx.bus.subscribe_all())),
            None => None,
        };
        debug!(gateway = ctx.gateway.base_url(), role = %ctx.session.user.role, "cli context ready");
        Ok(Self {
            ctx,
            output,
            events,
        })
    }

    /// Fetch the session role's permission set. Needed before mutations.
    pub async fn load_permissions(&mut self) {
        let policy = PermissionPolicy::load(
            &self.ctx.gateway,
            &self.ctx.session.user.role,
            &CancellationToken::new(),
        )
        .await;
        let session = self.ctx.session.as_ref().clone().with_policy(policy);
        self.ctx.session = Arc::new(session);
    }

    pub fn project_store(&self) -> Arc<ProjectStore> {
        EntityStore::shared(self.ctx.clone())
    }

    pub fn task_store(&self) -> TaskStore {
        TaskStore::new(self.ctx.clone(), self.project_store())
    }

    /// Wait for background activity posts, then mirror bus notices.
    async fn finish(&mut self) -> Result<()> {
        if !self.ctx.activity.drain_with_timeout(ACTIVITY_DRAIN_TIMEOUT).await {
            warn!(
                timeout_secs = ACTIVITY_DRAIN_TIMEOUT.as_secs(),
                "gave up waiting for activity posts"
            );
        }
        if let Some((sink, subscription)) = self.events.as_mut() {
            let written = sink.drain(subscription)?;
            debug!(written, "mirrored bus notices");
        }
        Ok(())
    }
}

/// The command's own error wins over a failure while finishing up.
fn settle(result: Result<()>, finished: Result<()>) -> Result<()> {
    if let (Err(_), Err(err)) = (&result, &finished) {
        warn!(error = %err, "failed to finish after command error");
    }
    result.and(finished)
}

/// Turn a captured fetch failure into an error for commands that cannot
/// proceed on a partial collection.
pub(crate) fn require_loaded<E: Entity>(snapshot: &StoreSnapshot<E>) -> Result<()> {
    match snapshot.error.as_ref() {
        Some(message) => Err(Error::Unavailable(format!(
            "could not load {}s: {message}",
            E::KIND
        ))),
        None => Ok(()),
    }
}

impl Cli {
    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.dispatch())
    }

    async fn dispatch(self) -> Result<()> {
        let Cli {
            config,
            gateway,
            token,
            json,
            quiet,
            events,
            command,
        } = self;
        let mut app = App::build(
            config.as_deref(),
            gateway,
            token,
            events.as_deref(),
            OutputOptions { json, quiet },
        )?;

        let result = match command {
            Commands::Project(cmd) => match cmd {
                ProjectCommands::List {
                    status,
                    priority,
                    search,
                } => {
                    project::run_list(
                        &app,
                        project::ListOptions {
                            status,
                            priority,
                            search,
                        },
                    )
                    .await
                }
                ProjectCommands::Show { id } => project::run_show(&app, id).await,
                ProjectCommands::New {
                    name,
                    description,
                    status,
                    priority,
                    progress,
                    due,
                } => {
                    project::run_new(
                        &mut app,
                        project::NewOptions {
                            name,
                            description,
                            status,
                            priority,
                            progress,
                            due,
                        },
                    )
                    .await
                }
                ProjectCommands::Edit {
                    id,
                    name,
                    description,
                    status,
                    priority,
                    progress,
                    due,
                } => {
                    project::run_edit(
                        &mut app,
                        project::EditOptions {
                            id,
                            name,
                            description,
                            status,
                            priority,
                            progress,
                            due,
                        },
                    )
                    .await
                }
                ProjectCommands::Rm { id } => project::run_rm(&mut app, id).await,
            },
            Commands::Task(cmd) => match cmd {
                TaskCommands::List {
                    project,
                    status,
                    priority,
                    search,
                } => {
                    task::run_list(
                        &app,
                        task::ListOptions {
                            project,
                            status,
                            priority,
                            search,
                        },
                    )
                    .await
                }
                TaskCommands::Show { id } => task::run_show(&app, id).await,
                TaskCommands::New {
                    title,
                    project,
                    description,
                    assignee,
                    status,
                    priority,
                    progress,
                    due,
                    tags,
                } => {
                    task::run_new(
                        &mut app,
                        task::NewOptions {
                            title,
                            project,
                            description,
                            assignee,
                            status,
                            priority,
                            progress,
                            due,
                            tags,
                        },
                    )
                    .await
                }
                TaskCommands::Edit {
                    id,
                    title,
                    description,
                    project,
                    assignee,
                    status,
                    priority,
                    progress,
                    due,
                    tags,
                    clear_tags,
                } => {
                    task::run_edit(
                        &mut app,
                        task::EditOptions {
                            id,
                            title,
                            description,
                            project,
                            assignee,
                            status,
                            priority,
                            progress,
                            due,
                            tags,
                            clear_tags,
                        },
                    )
                    .await
                }
                TaskCommands::Rm { id } => task::run_rm(&mut app, id).await,
            },
            Commands::Stats => report::run_stats(&app).await,
            Commands::Users => report::run_users(&app).await,
        };

        let finished = app.finish().await;
        settle(result, finished)
    }
}
