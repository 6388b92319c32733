use std::io::Write;

use imgsearch_core::host::recording::HostCall;
use imgsearch_core::host::{RunAt, ScriptTarget};
use imgsearch_core::ui_sync::{MenuItem, MenuItemKind, Text};
use imgsearch_core::{EngineTable, Outcome, UiPlan};
use owo_colors::OwoColorize;

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

fn text(t: &Text) -> String {
    match &t.arg_key {
        Some(arg) => format!("{}({})", t.key, arg),
        None => t.key.clone(),
    }
}

fn target(t: &ScriptTarget) -> String {
    match t {
        ScriptTarget::Frame { tab_id, frame_id } => format!("tab {tab_id} frame {frame_id}"),
        ScriptTarget::AllFrames { tab_id } => format!("tab {tab_id} all frames"),
    }
}

fn run_at(r: RunAt) -> &'static str {
    match r {
        RunAt::DocumentStart => "document_start",
        RunAt::DocumentIdle => "document_idle",
    }
}

/// Print the enabled engines in display order.
pub fn print_engines(
    w: &mut dyn Write,
    enabled: &[String],
    table: &EngineTable,
    color: ColorMode,
) -> std::io::Result<()> {
    if enabled.is_empty() {
        if color.enabled() {
            writeln!(w, "{}", "No engines enabled".yellow())?;
        } else {
            writeln!(w, "No engines enabled")?;
        }
        return Ok(());
    }
    for (i, id) in enabled.iter().enumerate() {
        let upload = table
            .get(id)
            .is_some_and(|engine| engine.upload_url.is_some());
        let note = if upload { "" } else { " (url only)" };
        if color.enabled() {
            writeln!(w, "{:>2}. {}{}", i + 1, id.bold(), note.dimmed())?;
        } else {
            writeln!(w, "{:>2}. {}{}", i + 1, id, note)?;
        }
    }
    Ok(())
}

fn print_menu_item(
    w: &mut dyn Write,
    item: &MenuItem,
    depth: usize,
    color: ColorMode,
) -> std::io::Result<()> {
    let indent = "  ".repeat(depth);
    match item.kind {
        MenuItemKind::Separator => writeln!(w, "{indent}----")?,
        MenuItemKind::Normal => {
            let title = item.title.as_ref().map(text).unwrap_or_default();
            if color.enabled() {
                writeln!(w, "{indent}{} {}", item.id.cyan(), title.dimmed())?;
            } else {
                writeln!(w, "{indent}{} {}", item.id, title)?;
            }
        }
    }
    Ok(())
}

/// Print the context-menu tree and toolbar action state.
pub fn print_plan(w: &mut dyn Write, plan: &UiPlan, color: ColorMode) -> std::io::Result<()> {
    writeln!(w, "Context menu:")?;
    if !plan.menu_enabled {
        writeln!(w, "  (hidden)")?;
    }
    for item in plan.menu.iter().filter(|item| item.parent.is_none()) {
        print_menu_item(w, item, 1, color)?;
        for child in plan
            .menu
            .iter()
            .filter(|child| child.parent.as_deref() == Some(item.id.as_str()))
        {
            print_menu_item(w, child, 2, color)?;
        }
    }
    if let Some(item) = plan.menu.first() {
        writeln!(w, "  contexts: {}", item.contexts.join(", "))?;
        writeln!(w, "  patterns: {}", item.url_patterns.join(", "))?;
    }

    writeln!(w)?;
    writeln!(w, "Toolbar action:")?;
    writeln!(w, "  title: {}", text(&plan.action.title))?;
    match &plan.action.popup {
        Some(popup) => writeln!(w, "  popup: {popup}")?,
        None => writeln!(w, "  click handler")?,
    }
    Ok(())
}

/// Print one recorded host call on a single line.
pub fn print_call(w: &mut dyn Write, call: &HostCall, color: ColorMode) -> std::io::Result<()> {
    let (verb, detail) = match call {
        HostCall::CreateTab {
            tab_id,
            url,
            index,
            active,
            opener_tab_id,
        } => {
            let mut detail = format!("#{tab_id} at {index} {url}");
            if !active {
                detail.push_str(" (background)");
            }
            if let Some(opener) = opener_tab_id {
                detail.push_str(&format!(" opener #{opener}"));
            }
            ("open tab", detail)
        }
        HostCall::RemoveTab { tab_id } => ("close tab", format!("#{tab_id}")),
        HostCall::ExecuteCode { target: t, code } => {
            ("run code", format!("{}: {}", target(t), code.replace('\n', " ")))
        }
        HostCall::ExecuteFile {
            target: t,
            path,
            run_at: r,
        } => ("run file", format!("{}: {} at {}", target(t), path, run_at(*r))),
        HostCall::InsertCss {
            target: t,
            path,
            run_at: r,
        } => ("insert css", format!("{}: {} at {}", target(t), path, run_at(*r))),
        HostCall::SendMessage {
            tab_id,
            frame_id,
            message,
        } => {
            let to = match frame_id {
                Some(frame) => format!("tab {tab_id} frame {frame}"),
                None => format!("tab {tab_id}"),
            };
            ("send", format!("{to}: {message}"))
        }
        HostCall::CreateObjectUrl { object_url } => ("blob", object_url.clone()),
        HostCall::RevokeObjectUrl { object_url } => ("revoke", object_url.clone()),
        HostCall::Notify { key, kind } => match kind {
            Some(kind) => ("notify", format!("{key} [{kind}]")),
            None => ("notify", key.clone()),
        },
        HostCall::RemoveAllMenuItems => ("menu", "cleared".to_string()),
        HostCall::CreateMenuItem { item } => ("menu item", item.id.clone()),
        HostCall::SetAction { state } => {
            let surface = state.popup.as_deref().unwrap_or("click handler");
            ("action", format!("{} -> {}", text(&state.title), surface))
        }
    };

    if color.enabled() {
        let verb = format!("{verb:>10}");
        match call {
            HostCall::Notify { .. } => writeln!(w, "{} {}", verb.yellow(), detail)?,
            HostCall::CreateTab { .. } => writeln!(w, "{} {}", verb.green(), detail)?,
            HostCall::RemoveTab { .. } | HostCall::RevokeObjectUrl { .. } => {
                writeln!(w, "{} {}", verb.red(), detail)?
            }
            _ => writeln!(w, "{} {}", verb.dimmed(), detail)?,
        }
    } else {
        writeln!(w, "{verb:>10} {detail}")?;
    }
    Ok(())
}

fn summarize(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Dispatched(report) => format!("dispatched to {} tab(s)", report.tabs.len()),
        Outcome::AwaitingConfirmation(token) => format!("awaiting confirmation ({token})"),
        Outcome::AwaitingSelection(token) => format!("awaiting selection ({token})"),
        Outcome::UploadPageOpened(tab) => format!("upload page opened in #{}", tab.id),
        Outcome::UploadDispatched { session, reports } => {
            format!("upload session {session}: {} image(s)", reports.len())
        }
        Outcome::ReceiptCounted { receipts, total } => format!("receipt {receipts}/{total}"),
        Outcome::SessionClosed { tab_id } => format!("session closed, tab #{tab_id}"),
        Outcome::Reported(notice) => format!("reported {}", notice.message_key()),
        Outcome::Replied => "replied".to_string(),
        Outcome::Closed => "closed".to_string(),
        Outcome::Relayed => "relayed".to_string(),
        Outcome::Registered => "frame registered".to_string(),
        Outcome::UiSynced(plan) => format!("ui synced, {} menu item(s)", plan.menu.len()),
        Outcome::TabForgotten { records, workflows } => {
            format!("tab forgotten ({records} record(s), {workflows} workflow(s))")
        }
        Outcome::Ignored => "ignored".to_string(),
    }
}

/// Print the header for one replayed event.
pub fn print_event_header(
    w: &mut dyn Write,
    line: usize,
    name: &str,
    color: ColorMode,
) -> std::io::Result<()> {
    if color.enabled() {
        writeln!(w, "{} {}", format!("[{line}]").dimmed(), name.bold())?;
    } else {
        writeln!(w, "[{line}] {name}")?;
    }
    Ok(())
}

/// Print how a replayed event ended.
pub fn print_outcome(
    w: &mut dyn Write,
    outcome: &Result<Outcome, String>,
    color: ColorMode,
) -> std::io::Result<()> {
    match outcome {
        Ok(outcome @ Outcome::Reported(_)) => {
            let summary = summarize(outcome);
            if color.enabled() {
                writeln!(w, "  -> {}", summary.yellow())?;
            } else {
                writeln!(w, "  -> {summary}")?;
            }
        }
        Ok(outcome) => {
            let summary = summarize(outcome);
            if color.enabled() {
                writeln!(w, "  -> {}", summary.green())?;
            } else {
                writeln!(w, "  -> {summary}")?;
            }
        }
        Err(e) => {
            if color.enabled() {
                writeln!(w, "  -> {} {}", "ERROR:".red(), e)?;
            } else {
                writeln!(w, "  -> ERROR: {e}")?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgsearch_core::Notice;

    fn render(f: impl FnOnce(&mut Vec<u8>) -> std::io::Result<()>) -> String {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn create_tab_line_without_color() {
        let out = render(|w| {
            print_call(
                w,
                &HostCall::CreateTab {
                    tab_id: 100,
                    url: "https://www.bing.com/x".into(),
                    index: 3,
                    active: false,
                    opener_tab_id: None,
                },
                ColorMode(false),
            )
        });
        assert_eq!(out, "  open tab #100 at 3 https://www.bing.com/x (background)\n");
    }

    #[test]
    fn notice_outcome_names_key() {
        let out = render(|w| {
            print_outcome(
                w,
                &Ok(Outcome::Reported(Notice::ImageNotFound)),
                ColorMode(false),
            )
        });
        assert_eq!(out, "  -> reported error_imageNotFound\n");
    }

    #[test]
    fn empty_engine_list() {
        let out = render(|w| print_engines(w, &[], &EngineTable::builtin(), ColorMode(false)));
        assert_eq!(out, "No engines enabled\n");
    }
}
