//! Built-in commands

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Args, Command, Param, ParamKind};
use crate::error::CommandError;
use crate::session::Session;

pub(super) fn all() -> Vec<Arc<dyn Command>> {
    vec![
        Arc::new(SetOption),
        Arc::new(GetOption),
        Arc::new(ResetOption),
        Arc::new(HistoryAdd),
        Arc::new(HistoryGet),
        Arc::new(HistoryClear),
        Arc::new(ReplayClient),
        Arc::new(ReplayCount),
        Arc::new(ReplayStop),
        Arc::new(FlowResume),
        Arc::new(FlowKill),
        Arc::new(FlowMark),
        Arc::new(FlowComment),
        Arc::new(ViewClear),
        Arc::new(ViewLength),
        Arc::new(ViewInbounds),
        Arc::new(ViewOrderReverse),
        Arc::new(EventsClear),
    ]
}

const FLOWS: &[Param] = &[Param::new("flows", ParamKind::Flows)];

struct SetOption;

#[async_trait]
impl Command for SetOption {
    fn name(&self) -> &'static str {
        "set"
    }

    fn help(&self) -> &'static str {
        "Set an option. When the value is omitted, booleans are set to true, \
         strings and integers are set to None (if permitted), and sequences are emptied."
    }

    fn params(&self) -> &'static [Param] {
        const P: &[Param] = &[
            Param::new("option", ParamKind::Str),
            Param::new("value", ParamKind::VarStr),
        ];
        P
    }

    async fn call(&self, session: &Session, args: Args) -> Result<Value, CommandError> {
        session.set_option_str(args.str(0)?, args.var(1))?;
        Ok(Value::Null)
    }
}

struct GetOption;

#[async_trait]
impl Command for GetOption {
    fn name(&self) -> &'static str {
        "options.get"
    }

    fn help(&self) -> &'static str {
        "Get the current value of an option."
    }

    fn params(&self) -> &'static [Param] {
        const P: &[Param] = &[Param::new("option", ParamKind::Str)];
        P
    }

    fn return_type(&self) -> Option<&'static str> {
        Some("any")
    }

    async fn call(&self, session: &Session, args: Args) -> Result<Value, CommandError> {
        Ok(session.option_value(args.str(0)?)?)
    }
}

struct ResetOption;

#[async_trait]
impl Command for ResetOption {
    fn name(&self) -> &'static str {
        "options.reset.one"
    }

    fn help(&self) -> &'static str {
        "Reset one option to its default value."
    }

    fn params(&self) -> &'static [Param] {
        const P: &[Param] = &[Param::new("name", ParamKind::Str)];
        P
    }

    async fn call(&self, session: &Session, args: Args) -> Result<Value, CommandError> {
        session.reset_option(args.str(0)?)?;
        Ok(Value::Null)
    }
}

struct HistoryAdd;

#[async_trait]
impl Command for HistoryAdd {
    fn name(&self) -> &'static str {
        "commands.history.add"
    }

    fn help(&self) -> &'static str {
        "Add a command to the command history."
    }

    fn params(&self) -> &'static [Param] {
        const P: &[Param] = &[Param::new("command", ParamKind::Str)];
        P
    }

    async fn call(&self, session: &Session, args: Args) -> Result<Value, CommandError> {
        session.history_add(args.str(0)?);
        Ok(Value::Null)
    }
}

struct HistoryGet;

#[async_trait]
impl Command for HistoryGet {
    fn name(&self) -> &'static str {
        "commands.history.get"
    }

    fn help(&self) -> &'static str {
        "Get the entire command history."
    }

    fn return_type(&self) -> Option<&'static str> {
        Some("str[]")
    }

    async fn call(&self, session: &Session, _args: Args) -> Result<Value, CommandError> {
        Ok(json!(session.history()))
    }
}

struct HistoryClear;

#[async_trait]
impl Command for HistoryClear {
    fn name(&self) -> &'static str {
        "commands.history.clear"
    }

    fn help(&self) -> &'static str {
        "Clear the command history."
    }

    async fn call(&self, session: &Session, _args: Args) -> Result<Value, CommandError> {
        session.history_clear();
        Ok(Value::Null)
    }
}

struct ReplayClient;

#[async_trait]
impl Command for ReplayClient {
    fn name(&self) -> &'static str {
        "replay.client"
    }

    fn help(&self) -> &'static str {
        "Replay requests from flows."
    }

    fn params(&self) -> &'static [Param] {
        FLOWS
    }

    async fn call(&self, session: &Session, args: Args) -> Result<Value, CommandError> {
        let mut accepted = Vec::new();
        let mut first_error = None;
        for id in args.flows(0)? {
            let flow = session.get_flow(id)?;
            match replay_check(&flow) {
                Some(reason) => {
                    session.events().warn(reason);
                    first_error.get_or_insert(reason);
                }
                None => accepted.push(flow),
            }
        }
        if accepted.is_empty() {
            if let Some(reason) = first_error {
                return Err(CommandError::Failed(reason.to_string()));
            }
        }

        let count = accepted.len();
        for flow in accepted {
            // no session lock is held here
            session.engine().replay(flow).await?;
        }
        if count > 0 {
            session.events().info(format!("Replaying {} flow(s).", count));
        }
        Ok(Value::Null)
    }
}

fn replay_check(flow: &crate::flow::Flow) -> Option<&'static str> {
    if flow.intercepted {
        return Some("Can't replay intercepted flow.");
    }
    let Some(request) = flow.request() else {
        return Some("Can only replay HTTP flows.");
    };
    if request.content.is_none() {
        return Some("Can't replay flow with missing content.");
    }
    None
}

struct ReplayCount;

#[async_trait]
impl Command for ReplayCount {
    fn name(&self) -> &'static str {
        "replay.client.count"
    }

    fn help(&self) -> &'static str {
        "Approximate number of flows queued for replay."
    }

    fn return_type(&self) -> Option<&'static str> {
        Some("int")
    }

    async fn call(&self, session: &Session, _args: Args) -> Result<Value, CommandError> {
        Ok(json!(session.engine().replay_count()))
    }
}

struct ReplayStop;

#[async_trait]
impl Command for ReplayStop {
    fn name(&self) -> &'static str {
        "replay.client.stop"
    }

    fn help(&self) -> &'static str {
        "Stop client replay."
    }

    async fn call(&self, session: &Session, _args: Args) -> Result<Value, CommandError> {
        let stopped = session.engine().stop_replays();
        session.events().info(format!("Client replay queue cleared ({} dropped).", stopped));
        Ok(Value::Null)
    }
}

struct FlowResume;

#[async_trait]
impl Command for FlowResume {
    fn name(&self) -> &'static str {
        "flow.resume"
    }

    fn help(&self) -> &'static str {
        "Resume flows if they are intercepted."
    }

    fn params(&self) -> &'static [Param] {
        FLOWS
    }

    async fn call(&self, session: &Session, args: Args) -> Result<Value, CommandError> {
        for id in args.flows(0)? {
            session.resume_flow(id)?;
        }
        Ok(Value::Null)
    }
}

struct FlowKill;

#[async_trait]
impl Command for FlowKill {
    fn name(&self) -> &'static str {
        "flow.kill"
    }

    fn help(&self) -> &'static str {
        "Kill running flows."
    }

    fn params(&self) -> &'static [Param] {
        FLOWS
    }

    async fn call(&self, session: &Session, args: Args) -> Result<Value, CommandError> {
        for id in args.flows(0)? {
            session.kill_flow(id)?;
        }
        Ok(Value::Null)
    }
}

struct FlowMark;

#[async_trait]
impl Command for FlowMark {
    fn name(&self) -> &'static str {
        "flow.mark"
    }

    fn help(&self) -> &'static str {
        "Mark flows."
    }

    fn params(&self) -> &'static [Param] {
        const P: &[Param] = &[
            Param::new("flows", ParamKind::Flows),
            Param::new("marker", ParamKind::Str),
        ];
        P
    }

    async fn call(&self, session: &Session, args: Args) -> Result<Value, CommandError> {
        let marker = args.str(1)?;
        for id in args.flows(0)? {
            session.mark_flow(id, marker)?;
        }
        Ok(Value::Null)
    }
}

struct FlowComment;

#[async_trait]
impl Command for FlowComment {
    fn name(&self) -> &'static str {
        "flow.comment"
    }

    fn help(&self) -> &'static str {
        "Add a comment to flows."
    }

    fn params(&self) -> &'static [Param] {
        const P: &[Param] = &[
            Param::new("flows", ParamKind::Flows),
            Param::new("comment", ParamKind::Str),
        ];
        P
    }

    async fn call(&self, session: &Session, args: Args) -> Result<Value, CommandError> {
        let comment = args.str(1)?;
        for id in args.flows(0)? {
            session.comment_flow(id, comment)?;
        }
        Ok(Value::Null)
    }
}

struct ViewClear;

#[async_trait]
impl Command for ViewClear {
    fn name(&self) -> &'static str {
        "view.clear"
    }

    fn help(&self) -> &'static str {
        "Clears both the store and view."
    }

    async fn call(&self, session: &Session, _args: Args) -> Result<Value, CommandError> {
        session.clear();
        Ok(Value::Null)
    }
}

struct ViewLength;

#[async_trait]
impl Command for ViewLength {
    fn name(&self) -> &'static str {
        "view.properties.length"
    }

    fn help(&self) -> &'static str {
        "Returns the number of flows in the view."
    }

    fn return_type(&self) -> Option<&'static str> {
        Some("int")
    }

    async fn call(&self, session: &Session, _args: Args) -> Result<Value, CommandError> {
        Ok(json!(session.view_len()))
    }
}

struct ViewInbounds;

#[async_trait]
impl Command for ViewInbounds {
    fn name(&self) -> &'static str {
        "view.properties.inbounds"
    }

    fn help(&self) -> &'static str {
        "Is this 0 <= index < len(self)?"
    }

    fn params(&self) -> &'static [Param] {
        const P: &[Param] = &[Param::new("index", ParamKind::Int)];
        P
    }

    fn return_type(&self) -> Option<&'static str> {
        Some("bool")
    }

    async fn call(&self, session: &Session, args: Args) -> Result<Value, CommandError> {
        let index = args.int(0)?;
        let len = session.view_len() as i64;
        Ok(json!(index >= 0 && index < len))
    }
}

struct ViewOrderReverse;

#[async_trait]
impl Command for ViewOrderReverse {
    fn name(&self) -> &'static str {
        "view.order.reverse"
    }

    fn help(&self) -> &'static str {
        "Reverse the flow sort order."
    }

    fn params(&self) -> &'static [Param] {
        const P: &[Param] = &[Param::new("boolean", ParamKind::Bool)];
        P
    }

    async fn call(&self, session: &Session, args: Args) -> Result<Value, CommandError> {
        let mut changes = serde_json::Map::new();
        changes.insert("view_order_reversed".into(), Value::Bool(args.bool(0)?));
        session.set_options(changes)?;
        Ok(Value::Null)
    }
}

struct EventsClear;

#[async_trait]
impl Command for EventsClear {
    fn name(&self) -> &'static str {
        "events.clear"
    }

    fn help(&self) -> &'static str {
        "Clear the event log."
    }

    async fn call(&self, session: &Session, _args: Args) -> Result<Value, CommandError> {
        session.events().clear();
        Ok(Value::Null)
    }
}
