use {
    std::{
        fmt::{self, Write as _},
        io::{self, Write},
    },
    tracing::{
        Event, Level, Metadata, Subscriber,
        field::{Field, Visit},
    },
    tracing_subscriber::{Layer, layer::Context},
};

/// Prints events of this application to the terminal: warnings and errors
/// to stderr, everything else to stdout. The log file keeps the full record.
pub struct TermLayer;

impl<S: Subscriber> Layer<S> for TermLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut text = String::new();
        let mut fields = Vec::new();
        event.record(&mut DebugVisitor(&mut text, &mut fields));
        if !fields.is_empty() {
            let _ = write!(text, " ({})", fields.join(", "));
        }
        if !text.ends_with('\n') {
            text.push('\n');
        }
        let level = *event.metadata().level();
        let _ = if level == Level::ERROR || level == Level::WARN {
            io::stderr().lock().write_all(text.as_bytes())
        } else {
            io::stdout().lock().write_all(text.as_bytes())
        };
    }

    fn enabled(&self, metadata: &Metadata<'_>, _ctx: Context<'_, S>) -> bool {
        metadata
            .module_path()
            .is_some_and(|path| path.starts_with("blindbackup"))
    }
}

struct DebugVisitor<'a>(&'a mut String, &'a mut Vec<String>);

impl Visit for DebugVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.0.push_str(value);
        } else {
            self.1.push(format!("{} = {value}", field.name()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.0, "{value:?}");
        } else {
            self.1.push(format!("{} = {value:?}", field.name()));
        }
    }
}
