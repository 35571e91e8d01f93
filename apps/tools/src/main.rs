use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use sequencer::is_dense;
use server_api::payload;
use shared::domain::{ProjectId, UserId, DEFAULT_CANVAS_HEIGHT, DEFAULT_CANVAS_WIDTH, DEFAULT_FPS};
use storage::{NewProject, Storage};

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/animator.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateUser {
        username: String,
    },
    CreateProject {
        owner_user_id: i64,
        title: String,
        #[arg(long, default_value_t = i64::from(DEFAULT_CANVAS_WIDTH))]
        width: i64,
        #[arg(long, default_value_t = i64::from(DEFAULT_CANVAS_HEIGHT))]
        height: i64,
        #[arg(long, default_value_t = i64::from(DEFAULT_FPS))]
        fps: i64,
    },
    ListFrames {
        project_id: i64,
    },
    /// Reports whether the project's frame indices are exactly 1..N.
    CheckFrames {
        project_id: i64,
    },
    /// Compacts the project's frame indices back to 1..N, keeping their order.
    RepairFrames {
        project_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::CreateUser { username } => {
            let user_id = storage.create_user(username.trim()).await?;
            println!("user_id={}", user_id.0);
        }
        Command::CreateProject {
            owner_user_id,
            title,
            width,
            height,
            fps,
        } => {
            let project = new_project(&title, width, height, fps)?;
            let owner = UserId(owner_user_id);
            if !storage.user_exists(owner).await? {
                bail!("user {owner_user_id} does not exist");
            }
            let created = storage.create_project(owner, &project).await?;
            println!(
                "created project_id={} frame_id={}",
                created.project.project_id.0, created.frame.frame_id.0
            );
        }
        Command::ListFrames { project_id } => {
            for frame in storage.list_frames(ProjectId(project_id)).await? {
                println!(
                    "{:>4}  frame_id={}  preview={}  updated={}",
                    frame.index,
                    frame.frame_id.0,
                    frame.preview_key.as_deref().unwrap_or("-"),
                    frame.updated_at.to_rfc3339()
                );
            }
        }
        Command::CheckFrames { project_id } => {
            let frames = storage.list_frames(ProjectId(project_id)).await?;
            if is_dense(frames.iter().map(|frame| frame.index)) {
                println!("project {project_id}: {} frames, indices dense", frames.len());
            } else {
                let indices: Vec<String> =
                    frames.iter().map(|frame| frame.index.to_string()).collect();
                println!(
                    "project {project_id}: indices not dense [{}]",
                    indices.join(", ")
                );
                std::process::exit(1);
            }
        }
        Command::RepairFrames { project_id } => {
            let moved = storage.compact_frames(ProjectId(project_id)).await?;
            println!("project {project_id}: moved {moved} frames");
        }
    }

    Ok(())
}

/// Applies the same title and canvas rules as the HTTP API.
fn new_project(title: &str, width: i64, height: i64, fps: i64) -> Result<NewProject> {
    Ok(NewProject {
        title: payload::required_title(title)?,
        description: String::new(),
        width: payload::canvas_side("width", width)?,
        height: payload::canvas_side("height", height)?,
        fps: payload::fps(fps)?,
    })
}
