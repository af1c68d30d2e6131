//! Line commands read from stdin, standing in for the OS notifications and UI
//! actions a desktop shell would deliver.

use std::io::BufRead;
use std::path::PathBuf;
use std::thread;

use calloop::channel::Sender;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Sleep,
    Wake,
    Lock,
    Unlock,
    DisplaysChanged,
    AddDock(PathBuf),
    RemoveDock(String),
    HideDock(String),
    ShowDock(String),
    ListDocks,
    Reload,
    Wallpaper { display_id: String, path: PathBuf },
    ClearWallpaper(String),
    Mute(String),
    Playback(bool),
    Video(bool),
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  sleep | wake | lock | unlock | displays
  dock add <path> | dock rm <id> | dock hide <id> | dock show <id> | docks
  reload
  wallpaper <display> <path> | wallpaper clear <display> | mute <display>
  playback on|off | video on|off
  help | quit";

fn switch(word: Option<&str>) -> Result<bool, String> {
    match word {
        Some("on") => Ok(true),
        Some("off") => Ok(false),
        other => Err(format!("expected on|off, got {other:?}")),
    }
}

fn rest(line: &str, skip: usize) -> Option<String> {
    let mut text = line.trim_start();
    for _ in 0..skip {
        let end = text.find(char::is_whitespace)?;
        text = text[end..].trim_start();
    }
    let text = text.trim_end();
    (!text.is_empty()).then(|| text.to_string())
}

pub fn parse(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Err("empty command".into());
    };
    let command = match head {
        "sleep" => Command::Sleep,
        "wake" => Command::Wake,
        "lock" => Command::Lock,
        "unlock" => Command::Unlock,
        "displays" => Command::DisplaysChanged,
        "docks" => Command::ListDocks,
        "reload" => Command::Reload,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        "playback" => Command::Playback(switch(words.next())?),
        "video" => Command::Video(switch(words.next())?),
        "mute" => Command::Mute(words.next().ok_or("mute needs a display")?.to_string()),
        "dock" => {
            let verb = words.next().ok_or("dock needs add|rm|hide|show")?;
            let arg = rest(line, 2).ok_or_else(|| format!("dock {verb} needs an argument"))?;
            match verb {
                "add" => Command::AddDock(PathBuf::from(arg)),
                "rm" | "remove" => Command::RemoveDock(arg),
                "hide" => Command::HideDock(arg),
                "show" => Command::ShowDock(arg),
                other => return Err(format!("unknown dock verb {other:?}")),
            }
        }
        "wallpaper" => match words.next() {
            Some("clear") => Command::ClearWallpaper(
                words.next().ok_or("wallpaper clear needs a display")?.to_string(),
            ),
            Some(display_id) => Command::Wallpaper {
                display_id: display_id.to_string(),
                path: PathBuf::from(rest(line, 2).ok_or("wallpaper needs a path")?),
            },
            None => return Err("wallpaper needs a display".into()),
        },
        other => return Err(format!("unknown command {other:?}")),
    };
    Ok(command)
}

/// Reads stdin on its own thread; end of input becomes [`Command::Quit`].
pub fn spawn_stdin_reader(sender: Sender<Command>) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("driftdock-stdin".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        warn!("stdin read failed: {err}");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match parse(&line) {
                    Ok(command) => {
                        if sender.send(command).is_err() {
                            return;
                        }
                    }
                    Err(err) => warn!("{err}; type `help`"),
                }
            }
            info!("stdin closed");
            let _ = sender.send(Command::Quit);
        })
}
