use std::{
    env,
    io::{self, Write},
    path::PathBuf,
    process::{Command as Process, Stdio},
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local, NaiveDate, Utc};

use school_portal::{
    calendar::{CalendarEvent, CalendarView, FeedEncoder, Locale, RelevanceLabel, sorted_events, upcoming},
    inbox::{AbsenceReport, InboxService, NotificationKind, Participant, ParticipantRole, Thread, compose},
    server::{self, FeedState},
    storage::{config::Config, open_stores, records::EventRecord},
    viewer::Viewer,
};

pub const USAGE: &str = "\
Usage: school-portal <command> [options]

Commands:
  serve [--bind ADDR]                         Serve GET /api/calendar
  feed                                        Print the iCalendar feed
  agenda [--mine] [--year-group LABEL]... [--limit N]
                                              Show upcoming events by day
  inbox --user ID --role ROLE [--open THREAD] [--reply TEXT]
                                              List threads, mark one read, reply
  report-absence --user ID --name NAME --email EMAIL --child NAME
                 --date YYYY-MM-DD [--until YYYY-MM-DD] --reason TEXT
  notify --user ID --name NAME --email EMAIL --parent ID --child NAME
         --kind achievement|incident|general --notes TEXT [--treatment TEXT]
  import-events FILE                          Load a JSON array of events";

const DEFAULT_AGENDA_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Serve {
        bind: Option<String>,
    },
    Feed,
    Agenda {
        mine: bool,
        year_groups: Vec<RelevanceLabel>,
        limit: usize,
    },
    Inbox {
        user: String,
        role: ParticipantRole,
        open: Option<String>,
        reply: Option<String>,
    },
    ReportAbsence {
        user: String,
        name: String,
        email: String,
        report: AbsenceReport,
    },
    Notify {
        user: String,
        name: String,
        email: String,
        parent: String,
        child: String,
        kind: NotificationKind,
        notes: String,
        treatment: Option<String>,
    },
    ImportEvents {
        path: PathBuf,
    },
    Help,
}

fn required(value: Option<String>, flag: &str) -> Result<String, String> {
    value.ok_or_else(|| format!("Missing required option {}", flag))
}

fn next_value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, String> {
    args.next()
        .ok_or_else(|| format!("Option {} needs a value", flag))
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| format!("Invalid date '{}'. Use YYYY-MM-DD.", value))
}

pub fn parse_command(args: impl IntoIterator<Item = String>) -> Result<Command, String> {
    let mut args = args.into_iter();
    let Some(command) = args.next() else {
        return Ok(Command::Help);
    };

    match command.as_str() {
        "serve" => {
            let mut bind = None;
            while let Some(arg) = args.next() {
                match arg.as_str() {
                    "--bind" => bind = Some(next_value(&mut args, "--bind")?),
                    _ => return Err(format!("Unknown argument: {}", arg)),
                }
            }
            Ok(Command::Serve { bind })
        }
        "feed" => match args.next() {
            Some(arg) => Err(format!("Unknown argument: {}", arg)),
            None => Ok(Command::Feed),
        },
        "agenda" => {
            let mut mine = false;
            let mut year_groups = Vec::new();
            let mut limit = DEFAULT_AGENDA_LIMIT;
            while let Some(arg) = args.next() {
                match arg.as_str() {
                    "--mine" => mine = true,
                    "--year-group" => {
                        let raw = next_value(&mut args, "--year-group")?;
                        let label = RelevanceLabel::parse(&raw)
                            .ok_or_else(|| format!("Invalid year group '{}'", raw))?;
                        year_groups.push(label);
                    }
                    "--limit" => {
                        let raw = next_value(&mut args, "--limit")?;
                        limit = raw
                            .parse()
                            .map_err(|_| format!("Invalid limit '{}'", raw))?;
                    }
                    _ => return Err(format!("Unknown argument: {}", arg)),
                }
            }
            Ok(Command::Agenda {
                mine,
                year_groups,
                limit,
            })
        }
        "inbox" => {
            let (mut user, mut role, mut open, mut reply) = (None, None, None, None);
            while let Some(arg) = args.next() {
                match arg.as_str() {
                    "--user" => user = Some(next_value(&mut args, "--user")?),
                    "--role" => {
                        let raw = next_value(&mut args, "--role")?;
                        role = Some(
                            ParticipantRole::parse(&raw)
                                .ok_or_else(|| format!("Invalid role '{}'", raw))?,
                        );
                    }
                    "--open" => open = Some(next_value(&mut args, "--open")?),
                    "--reply" => reply = Some(next_value(&mut args, "--reply")?),
                    _ => return Err(format!("Unknown argument: {}", arg)),
                }
            }
            if reply.is_some() && open.is_none() {
                return Err("--reply needs --open THREAD".to_string());
            }
            Ok(Command::Inbox {
                user: required(user, "--user")?,
                role: role.ok_or_else(|| "Missing required option --role".to_string())?,
                open,
                reply,
            })
        }
        "report-absence" => {
            let (mut user, mut name, mut email, mut child) = (None, None, None, None);
            let (mut date, mut until, mut reason) = (None, None, None);
            while let Some(arg) = args.next() {
                match arg.as_str() {
                    "--user" => user = Some(next_value(&mut args, "--user")?),
                    "--name" => name = Some(next_value(&mut args, "--name")?),
                    "--email" => email = Some(next_value(&mut args, "--email")?),
                    "--child" => child = Some(next_value(&mut args, "--child")?),
                    "--date" => date = Some(parse_date(&next_value(&mut args, "--date")?)?),
                    "--until" => until = Some(parse_date(&next_value(&mut args, "--until")?)?),
                    "--reason" => reason = Some(next_value(&mut args, "--reason")?),
                    _ => return Err(format!("Unknown argument: {}", arg)),
                }
            }
            Ok(Command::ReportAbsence {
                user: required(user, "--user")?,
                name: required(name, "--name")?,
                email: required(email, "--email")?,
                report: AbsenceReport {
                    child_name: required(child, "--child")?,
                    start_date: date.ok_or_else(|| "Missing required option --date".to_string())?,
                    end_date: until,
                    reason: required(reason, "--reason")?,
                },
            })
        }
        "notify" => {
            let (mut user, mut name, mut email, mut parent) = (None, None, None, None);
            let (mut child, mut kind, mut notes, mut treatment) = (None, None, None, None);
            while let Some(arg) = args.next() {
                match arg.as_str() {
                    "--user" => user = Some(next_value(&mut args, "--user")?),
                    "--name" => name = Some(next_value(&mut args, "--name")?),
                    "--email" => email = Some(next_value(&mut args, "--email")?),
                    "--parent" => parent = Some(next_value(&mut args, "--parent")?),
                    "--child" => child = Some(next_value(&mut args, "--child")?),
                    "--kind" => {
                        let raw = next_value(&mut args, "--kind")?;
                        kind = Some(
                            NotificationKind::parse(&raw)
                                .ok_or_else(|| format!("Invalid notification kind '{}'", raw))?,
                        );
                    }
                    "--notes" => notes = Some(next_value(&mut args, "--notes")?),
                    "--treatment" => treatment = Some(next_value(&mut args, "--treatment")?),
                    _ => return Err(format!("Unknown argument: {}", arg)),
                }
            }
            Ok(Command::Notify {
                user: required(user, "--user")?,
                name: required(name, "--name")?,
                email: required(email, "--email")?,
                parent: required(parent, "--parent")?,
                child: required(child, "--child")?,
                kind: kind.ok_or_else(|| "Missing required option --kind".to_string())?,
                notes: required(notes, "--notes")?,
                treatment,
            })
        }
        "import-events" => {
            let path = args
                .next()
                .ok_or_else(|| "import-events needs a FILE".to_string())?;
            if let Some(arg) = args.next() {
                return Err(format!("Unknown argument: {}", arg));
            }
            Ok(Command::ImportEvents {
                path: PathBuf::from(path),
            })
        }
        "help" | "--help" | "-h" => Ok(Command::Help),
        _ => Err(format!("Unknown command: {}", command)),
    }
}

pub fn parse_cli_command() -> Result<Command, String> {
    parse_command(env::args().skip(1))
}

pub async fn run(command: Command) -> Result<()> {
    if command == Command::Help {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = Config::load_or_create().context("Failed to load config")?;
    let stores = open_stores(&config.store).context("Failed to open store")?;

    match command {
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            let state = Arc::new(FeedState {
                events: stores.events,
                calendar: config.calendar.clone(),
            });
            server::serve(&bind, state)
                .await
                .with_context(|| format!("Server on {} failed", bind))?;
        }
        Command::Feed => {
            let events = sorted_events(stores.events.list_events().await?);
            let feed = FeedEncoder::from_config(&config.calendar).encode(&events)?;
            print!("{}", feed);
        }
        Command::Agenda {
            mine,
            year_groups,
            limit,
        } => {
            let viewer = Viewer::new("cli", ParticipantRole::Parent).with_year_groups(year_groups);
            let events = stores.events.list_events().await?;
            let view = CalendarView::new(&viewer).only_mine(mine);
            let soon = upcoming(view.events(events), Utc::now(), limit);
            let agenda = format_agenda_text(&view.days(soon, &Local), config.calendar.default_locale);
            display_with_pager(&agenda)?;
        }
        Command::Inbox {
            user,
            role,
            open,
            reply,
        } => {
            let viewer = Viewer::new(user, role);
            let service = InboxService::new(stores.messages, config.inbox.mark_read_retries);
            let mut threads = service.threads_for(&viewer).await?;

            if let Some(key) = open {
                let thread = InboxService::find_thread(&mut threads, &key)?;
                let outcome = service.open_thread(thread, &viewer).await;
                for (message_id, e) in &outcome.failed {
                    eprintln!("Could not save read state for {}: {}", message_id, e);
                }
                if let Some(body) = reply {
                    let sent = service.reply(thread, &viewer, &body).await?;
                    println!("Sent reply {}", sent.id);
                }
                println!("{}", format_thread(thread));
            } else {
                println!("{}", format_thread_list(&threads, &viewer));
            }
        }
        Command::ReportAbsence {
            user,
            name,
            email,
            report,
        } => {
            let parent = Viewer::new(user, ParticipantRole::Parent).with_contact(name, email);
            let message = compose::absence_report(
                &parent.as_participant(),
                &config.inbox.school_admin,
                &report,
                Utc::now(),
            )?;
            let service = InboxService::new(stores.messages, config.inbox.mark_read_retries);
            let sent = service.send(message).await?;
            println!("Absence report sent ({})", sent.id);
        }
        Command::Notify {
            user,
            name,
            email,
            parent,
            child,
            kind,
            notes,
            treatment,
        } => {
            let teacher = Viewer::new(user, ParticipantRole::Teacher).with_contact(name, email);
            let parent = Participant {
                id: parent,
                name: String::new(),
                email: String::new(),
                role: ParticipantRole::Parent,
            };
            let message = compose::teacher_notification(
                &teacher.as_participant(),
                &parent,
                &child,
                kind,
                &notes,
                treatment.as_deref(),
                Utc::now(),
            )?;
            let service = InboxService::new(stores.messages, config.inbox.mark_read_retries);
            let sent = service.send(message).await?;
            println!("{} notification sent ({})", kind.as_str(), sent.id);
        }
        Command::ImportEvents { path } => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let documents: Vec<serde_json::Value> =
                serde_json::from_str(&content).context("Expected a JSON array of events")?;
            let events = parse_event_documents(documents);
            if events.is_empty() {
                bail!("No valid events found in {}", path.display());
            }
            for event in &events {
                stores.events.put_event(event).await?;
            }
            println!("Imported {} events", events.len());
        }
        Command::Help => {}
    }

    Ok(())
}

fn parse_event_documents(documents: Vec<serde_json::Value>) -> Vec<CalendarEvent> {
    documents
        .into_iter()
        .enumerate()
        .filter_map(|(index, document)| {
            let parsed = serde_json::from_value::<EventRecord>(document)
                .map_err(|e| e.to_string())
                .and_then(|record| CalendarEvent::try_from(record).map_err(|e| e.to_string()));
            match parsed {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::warn!("Skipping event #{}: {}", index, e);
                    eprintln!("Skipping event #{}: {}", index, e);
                    None
                }
            }
        })
        .collect()
}

fn format_agenda_text(
    days: &std::collections::BTreeMap<NaiveDate, Vec<CalendarEvent>>,
    locale: Locale,
) -> String {
    let mut lines = vec!["Upcoming events".to_string(), String::new()];

    if days.is_empty() {
        lines.push("No events scheduled.".to_string());
    }

    for (day, events) in days {
        lines.push(day.format("%A, %B %d, %Y").to_string());
        for event in events {
            lines.push(format!("  - {}", build_agenda_line(event, locale)));
        }
        lines.push(String::new());
    }

    lines.join("\n")
}

fn build_agenda_line(event: &CalendarEvent, locale: Locale) -> String {
    let time_label = if event.all_day {
        "All Day".to_string()
    } else {
        format!(
            "{}-{}",
            local_time(event.start),
            local_time(event.effective_end())
        )
    };

    let mut line = format!("{:<13} {}", time_label, event.title.get(locale));
    if !event.is_for_everyone() {
        let labels: Vec<&str> = event.relevant_to.iter().map(RelevanceLabel::as_str).collect();
        line.push_str(&format!(" [{}]", labels.join(", ")));
    }
    line
}

fn local_time(timestamp: DateTime<Utc>) -> String {
    timestamp.with_timezone(&Local).format("%H:%M").to_string()
}

fn format_thread_list(threads: &[Thread], viewer: &Viewer) -> String {
    if threads.is_empty() {
        return "Inbox is empty.".to_string();
    }

    threads
        .iter()
        .map(|thread| {
            let marker = if thread.is_unread_for(viewer) { "*" } else { " " };
            let with = thread
                .counterpart(&viewer.id)
                .map(|participant| participant.name.as_str())
                .unwrap_or("-");
            format!(
                "{} {:<24} {} | {} | {}",
                marker,
                thread.key(),
                thread.last_activity().with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                with,
                thread.subject()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_thread(thread: &Thread) -> String {
    let mut lines = vec![thread.subject().to_string(), String::new()];
    for message in thread.messages() {
        lines.push(format!(
            "{} ({}):",
            message.sender.name,
            message.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
        ));
        lines.push(message.body.clone());
        lines.push(String::new());
    }
    lines.join("\n")
}

fn display_with_pager(text: &str) -> Result<(), io::Error> {
    let pager_value = env::var("PAGER").unwrap_or_else(|_| "less".to_string());
    let mut parts = pager_value.split_whitespace();
    let cmd = match parts.next() {
        Some(c) => c,
        None => {
            print!("{text}");
            return Ok(());
        }
    };
    let args: Vec<&str> = parts.collect();

    match Process::new(cmd)
        .args(&args)
        .stdin(Stdio::piped())
        .spawn()
    {
        Ok(mut child) => {
            if let Some(stdin) = child.stdin.as_mut() {
                stdin.write_all(text.as_bytes())?;
            }
            let _ = child.wait();
        }
        Err(_) => {
            print!("{text}");
        }
    }

    Ok(())
}
