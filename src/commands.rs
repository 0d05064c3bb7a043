//! Telegram slash commands: account binding and per-account settings.

use serde_json::Value;

use crate::channels::telegram::update_message;
use crate::channels::whatsapp::{GatewaySettings, PartnerInstance};
use crate::dispatch::{Dispatcher, ACCOUNT_GUIDANCE};
use crate::error::{BridgeError, Result};
use crate::transform::{escape_html, normalize_recipient};
use crate::types::{Account, GatewaySendRequest, NotificationFlags, OutboundContent};

const HELP_TEXT: &str = "<b>WhatsApp bridge</b>\n\n\
    /instance &lt;idInstance&gt; &lt;apiTokenInstance&gt; - link a WhatsApp instance\n\
    /resetinstance - unlink the instance\n\
    /status - instance state and webhook settings\n\
    /setchat &lt;chat_id|@username&gt; - forward WhatsApp messages to another chat\n\
    /resetchat - forward to this chat again\n\
    /notifications [on|off] [incoming|outgoing|state|all] - show or toggle notifications\n\
    /reply &lt;chatId&gt; &lt;text&gt; - send a WhatsApp message\n\
    /me - show your link\n\
    /help - this list\n\n\
    <b>Partner accounts</b>\n\
    /setpartnertoken &lt;token&gt; - save your partner token\n\
    /createinstance - create a new instance\n\
    /getinstances - list your instances\n\
    /deleteinstance &lt;idInstance&gt; - delete an instance\n\n\
    Reply to a forwarded WhatsApp message to answer its sender.";

const PARTNER_TOKEN_GUIDANCE: &str =
    "No partner token saved for this chat. Send /setpartnertoken <token> first.";

const START_TEXT: &str = "Hi! This bot forwards your WhatsApp messages to Telegram and sends your replies back.\n\n\
    To begin, link your instance:\n/instance <idInstance> <apiTokenInstance>\n\n\
    Both values are in your gateway console. Send /help for all commands.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationTarget {
    Incoming,
    Outgoing,
    State,
    All,
}

impl NotificationTarget {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "incoming" => Some(Self::Incoming),
            "outgoing" => Some(Self::Outgoing),
            "state" | "status" => Some(Self::State),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
            Self::State => "state",
            Self::All => "all",
        }
    }

    pub fn apply(&self, mut flags: NotificationFlags, enabled: bool) -> NotificationFlags {
        match self {
            Self::Incoming => flags.incoming = enabled,
            Self::Outgoing => flags.outgoing_status = enabled,
            Self::State => flags.instance_state = enabled,
            Self::All => {
                flags.incoming = enabled;
                flags.outgoing_status = enabled;
                flags.instance_state = enabled;
            }
        }
        flags
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Help,
    Instance { instance_id: i64, token: String },
    ResetInstance,
    Status,
    SetChat { chat_id: String },
    ResetChat,
    Me,
    ShowNotifications,
    ToggleNotifications { target: NotificationTarget, enabled: bool },
    Reply { chat_id: String, text: String },
    SetPartnerToken { token: String },
    CreateInstance,
    ListInstances,
    DeleteInstance { instance_id: i64 },
    Invalid { usage: &'static str },
    Unknown(String),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Help => "help",
            Self::Instance { .. } => "instance",
            Self::ResetInstance => "resetinstance",
            Self::Status => "status",
            Self::SetChat { .. } => "setchat",
            Self::ResetChat => "resetchat",
            Self::Me => "me",
            Self::ShowNotifications | Self::ToggleNotifications { .. } => "notifications",
            Self::Reply { .. } => "reply",
            Self::SetPartnerToken { .. } => "setpartnertoken",
            Self::CreateInstance => "createinstance",
            Self::ListInstances => "getinstances",
            Self::DeleteInstance { .. } => "deleteinstance",
            Self::Invalid { .. } => "invalid",
            Self::Unknown(_) => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandContext {
    pub chat_id: String,
    pub user_name: Option<String>,
}

/// `@username` or a numeric chat id.
pub fn is_valid_chat_id(value: &str) -> bool {
    if let Some(name) = value.strip_prefix('@') {
        return !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    }
    let digits = value.strip_prefix('-').unwrap_or(value);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

/// Parses a message text; `None` unless it starts with `/`.
pub fn parse(text: &str) -> Option<Command> {
    let text = text.trim();
    if !text.starts_with('/') {
        return None;
    }
    let (head, rest) = match text.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (text, ""),
    };
    let name = head
        .split('@')
        .next()
        .unwrap_or(head)
        .to_lowercase();
    let args: Vec<&str> = rest.split_whitespace().collect();

    let command = match name.as_str() {
        "/start" => Command::Start,
        "/help" => Command::Help,
        "/instance" => match args.as_slice() {
            [id, token] => match id.parse::<i64>() {
                Ok(instance_id) => Command::Instance {
                    instance_id,
                    token: token.to_string(),
                },
                Err(_) => Command::Invalid {
                    usage: "/instance <idInstance> <apiTokenInstance>",
                },
            },
            _ => Command::Invalid {
                usage: "/instance <idInstance> <apiTokenInstance>",
            },
        },
        "/resetinstance" | "/reinstance" => Command::ResetInstance,
        "/status" | "/getstateinstance" => Command::Status,
        "/setchat" => match args.as_slice() {
            [chat] if is_valid_chat_id(chat) => Command::SetChat {
                chat_id: chat.to_string(),
            },
            _ => Command::Invalid {
                usage: "/setchat <chat_id|@username>",
            },
        },
        "/resetchat" => Command::ResetChat,
        "/me" => Command::Me,
        "/notifications" | "/notification" | "/notify" => parse_notifications(&args),
        "/reply" | "/sendmessage" => match rest.split_once(char::is_whitespace) {
            Some((chat, body)) if !body.trim().is_empty() => Command::Reply {
                chat_id: chat.to_string(),
                text: body.trim().to_string(),
            },
            _ => Command::Invalid {
                usage: "/reply <chatId> <text>",
            },
        },
        "/setpartnertoken" | "/partnertoken" => match args.as_slice() {
            [token] => Command::SetPartnerToken {
                token: token.to_string(),
            },
            _ => Command::Invalid {
                usage: "/setpartnertoken <token>",
            },
        },
        "/createinstance" => Command::CreateInstance,
        "/getinstances" | "/instances" => Command::ListInstances,
        "/deleteinstance" | "/deleteinstanceaccount" => match args.as_slice() {
            [id] => match id.parse::<i64>() {
                Ok(instance_id) if instance_id > 0 => Command::DeleteInstance { instance_id },
                _ => Command::Invalid {
                    usage: "/deleteinstance <idInstance>",
                },
            },
            _ => Command::Invalid {
                usage: "/deleteinstance <idInstance>",
            },
        },
        other => Command::Unknown(other.to_string()),
    };
    Some(command)
}

fn parse_notifications(args: &[&str]) -> Command {
    const USAGE: &str = "/notifications [on|off] [incoming|outgoing|state|all]";
    let lowered: Vec<String> = args.iter().map(|arg| arg.to_lowercase()).collect();
    let toggle = |action: &str| match action {
        "on" => Some(true),
        "off" => Some(false),
        _ => None,
    };

    match lowered.as_slice() {
        [] => Command::ShowNotifications,
        [first, second] => {
            let (first, second) = (first.as_str(), second.as_str());
            let parsed = toggle(first)
                .zip(NotificationTarget::parse(second))
                .or_else(|| toggle(second).zip(NotificationTarget::parse(first)));
            match parsed {
                Some((enabled, target)) => Command::ToggleNotifications { target, enabled },
                None => Command::Invalid { usage: USAGE },
            }
        }
        _ => Command::Invalid { usage: USAGE },
    }
}

/// Command carried by a Telegram update, with the chat that sent it.
pub fn from_update(update: &Value) -> Option<(CommandContext, Command)> {
    let message = update_message(update)?;
    let command = parse(message.get("text")?.as_str()?)?;
    let chat_id = message.get("chat")?.get("id")?.as_i64()?.to_string();
    let user_name = message
        .get("from")
        .and_then(|from| from.get("username"))
        .and_then(|v| v.as_str())
        .map(str::to_string);
    Some((CommandContext { chat_id, user_name }, command))
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

fn notifications_text(flags: &NotificationFlags) -> String {
    format!(
        "<b>Notification settings</b>\n\n\
         <b>Incoming messages</b>: {}\n\
         <b>Outgoing message statuses</b>: {}\n\
         <b>Instance state</b>: {}\n\n\
         Usage: <code>/notifications on incoming</code>, <code>/notifications off state</code>, \
         <code>/notifications all off</code>",
        on_off(flags.incoming),
        on_off(flags.outgoing_status),
        on_off(flags.instance_state),
    )
}

async fn linked_account(dispatcher: &Dispatcher, ctx: &CommandContext) -> Result<Option<Account>> {
    let account = dispatcher.registry.find_by_chat(&ctx.chat_id).await?;
    if account.is_none() {
        dispatcher
            .reply(&ctx.chat_id, OutboundContent::text(ACCOUNT_GUIDANCE))
            .await?;
    }
    Ok(account)
}

/// Runs `command` for `ctx` and returns its status tag.
pub async fn execute(dispatcher: &Dispatcher, ctx: &CommandContext, command: Command) -> Result<String> {
    let chat = ctx.chat_id.as_str();
    let status = match command {
        Command::Start => {
            dispatcher.reply(chat, OutboundContent::text(START_TEXT)).await?;
            "started".to_string()
        }
        Command::Help => {
            dispatcher.reply(chat, OutboundContent::html(HELP_TEXT)).await?;
            "help_shown".to_string()
        }
        Command::Instance { instance_id, token } => bind_instance(dispatcher, ctx, instance_id, token).await?,
        Command::ResetInstance => match dispatcher.registry.unbind(chat).await? {
            Some(account) => {
                let text = format!(
                    "Instance {} unlinked. Send /instance <idInstance> <apiTokenInstance> to link another one.",
                    account.instance_id
                );
                dispatcher.reply(chat, OutboundContent::text(text)).await?;
                "instance_reset".to_string()
            }
            None => {
                dispatcher.reply(chat, OutboundContent::text(ACCOUNT_GUIDANCE)).await?;
                "no_instance".to_string()
            }
        },
        Command::Status => {
            let Some(account) = linked_account(dispatcher, ctx).await? else {
                return Ok("no_instance".to_string());
            };
            let state = dispatcher.gateway.state(&account).await?;
            let mut text = dispatcher
                .transformer
                .state_text(account.instance_id, &account.credential_token, &state);
            match dispatcher.gateway.settings(&account).await {
                Ok(settings) => {
                    let flag = |value: Option<&str>| on_off(GatewaySettings::is_enabled(value));
                    text.push_str(&format!(
                        "\n\n<b>Webhook</b>: {}\n<b>Incoming</b>: {}\n<b>Outgoing</b>: {}\n<b>State</b>: {}",
                        escape_html(settings.webhook_url.as_deref().unwrap_or("not set")),
                        flag(settings.incoming_webhook.as_deref()),
                        flag(settings.outgoing_webhook.as_deref()),
                        flag(settings.state_webhook.as_deref()),
                    ));
                }
                Err(err) => tracing::warn!(instance_id = account.instance_id, "settings lookup failed: {err}"),
            }
            dispatcher.reply(chat, OutboundContent::html(text)).await?;
            "status_shown".to_string()
        }
        Command::SetChat { chat_id } => {
            if linked_account(dispatcher, ctx).await?.is_none() {
                return Ok("no_instance".to_string());
            }
            dispatcher.registry.set_destination(chat, Some(&chat_id)).await?;
            let text = format!("WhatsApp messages will now be forwarded to {chat_id}.");
            dispatcher.reply(chat, OutboundContent::text(text)).await?;
            "chat_set".to_string()
        }
        Command::ResetChat => {
            if linked_account(dispatcher, ctx).await?.is_none() {
                return Ok("no_instance".to_string());
            }
            dispatcher.registry.set_destination(chat, None).await?;
            dispatcher
                .reply(chat, OutboundContent::text("WhatsApp messages will be forwarded to this chat."))
                .await?;
            "chat_reset".to_string()
        }
        Command::Me => {
            let account = dispatcher.registry.find_by_chat(chat).await?;
            let mut text = format!(
                "Chat ID: {}\nUser: {}",
                chat,
                ctx.user_name.as_deref().unwrap_or("unknown")
            );
            match account {
                Some(account) => text.push_str(&format!(
                    "\nInstance: {}\nForwarding to: {}",
                    account.instance_id,
                    account.destination()
                )),
                None => text.push_str("\nInstance: not linked"),
            }
            dispatcher.reply(chat, OutboundContent::text(text)).await?;
            "me_shown".to_string()
        }
        Command::ShowNotifications => {
            let Some(account) = linked_account(dispatcher, ctx).await? else {
                return Ok("no_instance".to_string());
            };
            dispatcher
                .reply(chat, OutboundContent::html(notifications_text(&account.notifications)))
                .await?;
            "settings_shown".to_string()
        }
        Command::ToggleNotifications { target, enabled } => {
            let Some(account) = linked_account(dispatcher, ctx).await? else {
                return Ok("no_instance".to_string());
            };
            let flags = target.apply(account.notifications, enabled);
            dispatcher.registry.set_notifications(chat, flags).await?;
            let pushed = dispatcher
                .gateway
                .update_settings(&account, &GatewaySettings::from_flags(flags))
                .await
                .is_ok();
            let mut text = format!(
                "Notifications for {} turned {}.",
                target.as_str(),
                on_off(enabled)
            );
            if !pushed {
                text.push_str("\nThe gateway settings could not be updated; only this bridge will filter them.");
            }
            dispatcher.reply(chat, OutboundContent::text(text)).await?;
            format!("notifications_{}_{}", on_off(enabled), target.as_str())
        }
        Command::Reply { chat_id, text } => {
            let Some(account) = linked_account(dispatcher, ctx).await? else {
                return Ok("no_instance".to_string());
            };
            let request = GatewaySendRequest::Text {
                chat_id: normalize_recipient(&chat_id),
                message: text,
            };
            let message_id = dispatcher.gateway.send(&account, &request).await?;
            let text = format!("Message sent to {}. ID: {}", request.chat_id(), message_id);
            dispatcher.reply(chat, OutboundContent::text(text)).await?;
            "message_sent".to_string()
        }
        Command::SetPartnerToken { token } => {
            dispatcher.registry.set_partner_token(chat, &token).await?;
            let text = "Partner token saved. Use /createinstance to create an instance or /getinstances to list them.";
            dispatcher.reply(chat, OutboundContent::text(text)).await?;
            "partner_token_saved".to_string()
        }
        Command::CreateInstance => create_instance(dispatcher, chat).await?,
        Command::ListInstances => list_instances(dispatcher, chat).await?,
        Command::DeleteInstance { instance_id } => delete_instance(dispatcher, chat, instance_id).await?,
        Command::Invalid { usage } => {
            dispatcher
                .reply(chat, OutboundContent::text(format!("Invalid format. Use:\n{usage}")))
                .await?;
            "invalid_format".to_string()
        }
        Command::Unknown(name) => {
            let text = format!("Unknown command {name}. Send /help for the command list.");
            dispatcher.reply(chat, OutboundContent::text(text)).await?;
            "unknown_command".to_string()
        }
    };
    Ok(status)
}

async fn bind_instance(
    dispatcher: &Dispatcher,
    ctx: &CommandContext,
    instance_id: i64,
    token: String,
) -> Result<String> {
    let mut account = Account::new(ctx.chat_id.clone(), instance_id, token);
    account.user_name = ctx.user_name.clone();
    let account = dispatcher.registry.bind(account).await?;

    let links = &dispatcher.links;
    let settings = GatewaySettings::for_bridge(
        links.whatsapp_webhook_url.as_deref(),
        links.gateway_webhook_token.as_deref(),
        account.notifications,
    );
    let pushed = links.whatsapp_webhook_url.is_some()
        && dispatcher
            .gateway
            .update_settings(&account, &settings)
            .await
            .is_ok();

    let mut text = format!("Instance {instance_id} linked.\n\n");
    if pushed {
        text.push_str("The webhook was set automatically.\n\n");
    } else {
        let url = links
            .whatsapp_webhook_url
            .as_deref()
            .unwrap_or("<public url>/webhook/whatsapp");
        text.push_str(&format!(
            "The webhook could not be set automatically. Set it in the gateway console:\nURL: {url}\n\n"
        ));
    }
    text.push_str("You can now receive and send WhatsApp messages. Send /status to check the instance.");
    dispatcher.reply(&ctx.chat_id, OutboundContent::text(text)).await?;
    Ok("instance_created".to_string())
}

async fn saved_partner_token(dispatcher: &Dispatcher, chat: &str) -> Result<Option<String>> {
    let token = dispatcher.registry.partner_token(chat).await?;
    if token.is_none() {
        dispatcher
            .reply(chat, OutboundContent::text(PARTNER_TOKEN_GUIDANCE))
            .await?;
    }
    Ok(token)
}

/// Turns a partner API failure into a reply; other errors propagate.
async fn partner_failure(dispatcher: &Dispatcher, chat: &str, err: BridgeError) -> Result<String> {
    let text = match &err {
        BridgeError::PlatformApiError {
            status: Some(401 | 403),
            ..
        } => "The partner token was rejected. Save a valid one with /setpartnertoken <token>.",
        BridgeError::PlatformApiError { status: Some(404), .. } => {
            "The instance was not found in your partner account."
        }
        BridgeError::PlatformApiError { .. } => "The partner API request failed. Try again later.",
        _ => return Err(err),
    };
    tracing::warn!(chat_id = chat, code = err.code(), "partner call failed: {err}");
    dispatcher.reply(chat, OutboundContent::text(text)).await?;
    Ok("partner_error".to_string())
}

async fn create_instance(dispatcher: &Dispatcher, chat: &str) -> Result<String> {
    let Some(partner_token) = saved_partner_token(dispatcher, chat).await? else {
        return Ok("no_partner_token".to_string());
    };
    let links = &dispatcher.links;
    let settings = GatewaySettings::for_bridge(
        links.whatsapp_webhook_url.as_deref(),
        links.gateway_webhook_token.as_deref(),
        NotificationFlags::default(),
    );
    let created = match dispatcher.gateway.create_instance(&partner_token, &settings).await {
        Ok(created) => created,
        Err(err) => return partner_failure(dispatcher, chat, err).await,
    };

    let id = created.id_instance;
    let token = escape_html(created.api_token_instance.as_deref().unwrap_or_default());
    let text = format!(
        "Instance created.\n\n<b>ID</b>: <code>{id}</code>\n<b>Token</b>: <code>{token}</code>\n\n\
         Link it to this chat with:\n<code>/instance {id} {token}</code>"
    );
    dispatcher.reply(chat, OutboundContent::html(text)).await?;
    Ok("partner_instance_created".to_string())
}

fn instance_entry(position: usize, instance: &PartnerInstance) -> String {
    let field = |value: &Option<String>| escape_html(value.as_deref().unwrap_or("-"));
    let name = instance
        .name
        .as_deref()
        .filter(|name| !name.is_empty())
        .map(escape_html)
        .unwrap_or_else(|| "unnamed".to_string());
    format!(
        "<b>{position}.</b> <code>{}</code> {name}\n\
         Type: {} | Tariff: {}\n\
         Created: {} | Expires: {}\n\
         Status: {}",
        instance.id_instance,
        field(&instance.type_instance),
        field(&instance.tariff),
        field(&instance.time_created),
        field(&instance.expiration_date),
        if instance.is_expired { "expired" } else { "active" },
    )
}

async fn list_instances(dispatcher: &Dispatcher, chat: &str) -> Result<String> {
    let Some(partner_token) = saved_partner_token(dispatcher, chat).await? else {
        return Ok("no_partner_token".to_string());
    };
    let instances = match dispatcher.gateway.list_instances(&partner_token).await {
        Ok(instances) => instances,
        Err(err) => return partner_failure(dispatcher, chat, err).await,
    };
    if instances.is_empty() {
        dispatcher
            .reply(chat, OutboundContent::text("Your partner account has no instances."))
            .await?;
        return Ok("no_instances".to_string());
    }

    let (active, deleted): (Vec<_>, Vec<_>) = instances.iter().partition(|instance| !instance.deleted);
    if active.is_empty() {
        let text = format!(
            "Your partner account has no active instances ({} deleted).",
            deleted.len()
        );
        dispatcher.reply(chat, OutboundContent::text(text)).await?;
        return Ok("no_active_instances".to_string());
    }

    let entries: Vec<String> = active
        .iter()
        .enumerate()
        .map(|(idx, instance)| instance_entry(idx + 1, instance))
        .collect();
    let mut text = format!("<b>Your instances ({})</b>\n\n{}", active.len(), entries.join("\n\n"));
    if !deleted.is_empty() {
        text.push_str(&format!("\n\nDeleted instances: {}", deleted.len()));
    }
    dispatcher.reply(chat, OutboundContent::html(text)).await?;
    Ok("instances_listed".to_string())
}

async fn delete_instance(dispatcher: &Dispatcher, chat: &str, instance_id: i64) -> Result<String> {
    let Some(partner_token) = saved_partner_token(dispatcher, chat).await? else {
        return Ok("no_partner_token".to_string());
    };
    if let Err(err) = dispatcher.gateway.delete_instance(&partner_token, instance_id).await {
        return partner_failure(dispatcher, chat, err).await;
    }

    let mut text = format!("Instance {instance_id} deleted.");
    if dispatcher.registry.unbind_instance(instance_id).await?.is_some() {
        text.push_str(" It is no longer linked to this bridge.");
    }
    dispatcher.reply(chat, OutboundContent::text(text)).await?;
    Ok("instance_deleted".to_string())
}
