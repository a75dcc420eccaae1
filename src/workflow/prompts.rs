//! Everything the bot says, and the keyboards that go with it.

use crate::approval::decision::AdminAction;
use crate::catalog::{Catalog, PaymentMethod, Plan};
use crate::registry::{AccessLevel, PaidTier, UserId, UserRecord};
use crate::transport::{Button, Keyboard, Sender};

use super::intent::{
    self, BACK, BACK_PAYLOAD, CANCEL_PAYLOAD, CONFIRM_PAYLOAD, HELP_CENTER, METHOD_PAYLOAD, PAYMENT_INFO,
    PLAN_PAYLOAD, REQUEST_SERVICE, SERVICE_INFO, USER_INFO,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub text: String,
    pub keyboard: Option<Keyboard>,
}

impl Prompt {
    pub fn new(text: impl Into<String>, keyboard: Option<Keyboard>) -> Self {
        Self {
            text: text.into(),
            keyboard,
        }
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self::new(text, None)
    }

    /// Same prompt with a line in front of it.
    pub fn with_note(mut self, note: &str) -> Self {
        self.text = format!("{note}\n\n{}", self.text);
        self
    }
}

pub fn main_menu(level: AccessLevel) -> Keyboard {
    let mut rows = vec![
        vec![REQUEST_SERVICE.to_string(), SERVICE_INFO.to_string()],
        vec![PAYMENT_INFO.to_string(), HELP_CENTER.to_string()],
        vec![USER_INFO.to_string()],
    ];
    if let Some(tier) = level.tier() {
        rows.insert(0, vec![intent::services_label(tier)]);
    }
    Keyboard::Reply(rows)
}

pub fn welcome(name: &str, level: AccessLevel) -> Prompt {
    let name = if name.is_empty() { "there" } else { name };
    Prompt::new(
        format!(
            "👋 Welcome, {name}!\n\n\
             Press \"{REQUEST_SERVICE}\" or send /service to get advertising access.\n\
             Press \"{HELP_CENTER}\" or send /help if you need anything."
        ),
        Some(main_menu(level)),
    )
}

pub fn menu_hint(level: AccessLevel) -> Prompt {
    Prompt::new("Please choose an option from the menu.", Some(main_menu(level)))
}

pub fn plan_menu(catalog: &Catalog) -> Prompt {
    let mut text = String::from("📋 Choose an advertising plan:\n");
    for (i, plan) in catalog.plans().iter().enumerate() {
        text.push_str(&format!(
            "\n{}. {} - {} ({} days)",
            i + 1,
            plan.name,
            plan.price,
            plan.duration_days
        ));
    }
    let mut rows: Vec<Vec<Button>> = catalog
        .plans()
        .iter()
        .map(|plan| vec![Button::new(&plan.name, format!("{PLAN_PAYLOAD}{}", plan.id))])
        .collect();
    rows.push(vec![Button::new(BACK, BACK_PAYLOAD)]);
    Prompt::new(text, Some(Keyboard::Inline(rows)))
}

pub fn plan_details(plan: &Plan) -> Prompt {
    let mut text = format!(
        "📋 Plan Details: {}\n\n💰 Price: {}\n📅 Duration: {} days",
        plan.name, plan.price, plan.duration_days
    );
    if !plan.features.is_empty() {
        text.push_str("\n\n✨ Features:");
        for feature in &plan.features {
            text.push_str(&format!("\n• {feature}"));
        }
    }
    text.push_str("\n\nDo you want to proceed with this plan?");
    Prompt::new(
        text,
        Some(Keyboard::Inline(vec![
            vec![
                Button::new(intent::CONFIRM, CONFIRM_PAYLOAD),
                Button::new(intent::CANCEL, CANCEL_PAYLOAD),
            ],
            vec![Button::new(BACK, BACK_PAYLOAD)],
        ])),
    )
}

pub fn payment_methods(catalog: &Catalog) -> Prompt {
    let mut text = String::from("💳 Select Payment Method\n");
    for (i, method) in catalog.methods().iter().enumerate() {
        text.push_str(&format!("\n{}. {}", i + 1, method.name));
    }
    text.push_str("\n\nAfter payment, you'll need to upload proof.");
    let mut rows: Vec<Vec<Button>> = catalog
        .methods()
        .chunks(2)
        .map(|pair| {
            pair.iter()
                .map(|method| Button::new(&method.name, format!("{METHOD_PAYLOAD}{}", method.id)))
                .collect()
        })
        .collect();
    rows.push(vec![Button::new(BACK, BACK_PAYLOAD)]);
    Prompt::new(text, Some(Keyboard::Inline(rows)))
}

pub fn payment_instructions(plan: &Plan, method: &PaymentMethod) -> Prompt {
    Prompt::new(
        format!(
            "💰 Payment Instructions\n\n\
             Method: {}\nAccount: {}\nAmount: {}\n\n\
             1. Send the exact amount\n\
             2. Keep the transaction screenshot\n\
             3. Upload the screenshot here as a photo",
            method.name, method.account, plan.price
        ),
        Some(Keyboard::Inline(vec![vec![Button::new(intent::CANCEL, CANCEL_PAYLOAD)]])),
    )
}

pub fn submission_received() -> Prompt {
    Prompt::new(
        "✅ Payment proof received!\n\n\
         An administrator will verify your payment and you will be notified once it is approved.\n\n\
         Status: ⏳ Pending approval",
        Some(main_menu(AccessLevel::None)),
    )
}

pub fn pending_notice() -> Prompt {
    Prompt::plain("⏳ Your payment proof is being reviewed. We will notify you once an administrator has decided.")
}

pub fn already_approved(level: AccessLevel) -> Prompt {
    Prompt::new("✅ You already have access to our services!", Some(main_menu(level)))
}

pub fn cancelled() -> Prompt {
    Prompt::new("Plan selection cancelled.", Some(main_menu(AccessLevel::None)))
}

pub fn transient_failure() -> Prompt {
    Prompt::plain("⚠️ We could not reach our records right now. Please try again later.")
}

pub const PHOTO_NOT_EXPECTED: &str = "We are not expecting a photo at this step.";
pub const NOT_UNDERSTOOD: &str = "Sorry, I didn't understand that.";

pub fn help(catalog: &Catalog, contact: &str) -> Prompt {
    let mut text = String::from(
        "🤖 Bot Commands:\n\
         /start - Start the bot\n\
         /service - Request advertising access\n\
         /status - Show your account\n\
         /cancel - Cancel the current request\n\
         /help - Show this help message\n\n\
         📱 Services Available:",
    );
    for (i, plan) in catalog.plans().iter().enumerate() {
        text.push_str(&format!("\n{}. {} - {} days", i + 1, plan.name, plan.duration_days));
    }
    text.push_str("\n\n💳 Payment Methods:");
    for method in catalog.methods() {
        text.push_str(&format!("\n• {}", method.name));
    }
    text.push_str(&format!("\n\n🆘 Need Help?\nContact: {contact}"));
    Prompt::plain(text)
}

pub fn service_info() -> Prompt {
    Prompt::plain(
        "📊 Advertising Information\n\n\
         Why Choose Us?\n\
         • Targeted audience reach\n\
         • High engagement rates\n\
         • Affordable pricing\n\n\
         🕐 Processing Time:\n\
         • Approval: within 24 hours\n\
         • Setup: within 48 hours",
    )
}

pub fn payment_info(catalog: &Catalog) -> Prompt {
    let mut text = String::from("💳 Payment Methods:\n");
    for method in catalog.methods() {
        text.push_str(&format!("\n• {}: {}", method.name, method.account));
    }
    text.push_str("\n\n💰 Prices:\n");
    for plan in catalog.plans() {
        text.push_str(&format!("\n• {}: {}", plan.name, plan.price));
    }
    Prompt::plain(text)
}

pub fn user_info(user_id: UserId, sender: &Sender, record: Option<&UserRecord>) -> Prompt {
    let level = record.map(|r| r.access_level).unwrap_or_default();
    let name = record
        .map(|r| r.display_name.as_str())
        .filter(|name| !name.is_empty())
        .unwrap_or(&sender.display_name);
    let handle = record
        .map(|r| r.handle.as_str())
        .filter(|handle| !handle.is_empty())
        .or(sender.handle.as_deref())
        .unwrap_or("N/A");
    let mut text = format!("User Level - {level}\nUser ID - {user_id}\nName - {name}\nUser name - @{handle}");
    if let Some(record) = record {
        text.push_str(&format!("\nStatus - {}", record.status));
        if let Some(expires_at) = record.expires_at {
            text.push_str(&format!("\nExpires - {}", expires_at.format("%Y-%m-%d")));
        }
    }
    Prompt::plain(text)
}

pub fn tier_services(tier: PaidTier) -> Prompt {
    let (count, tagline) = match tier {
        PaidTier::Gold => (3, "More features for Gold members..."),
        PaidTier::Platinum => (4, "Premium features for Platinum members..."),
        PaidTier::Ruby => (5, "VIP features for Ruby members..."),
    };
    let mut text = format!("{tier} Level Services:\n");
    for n in 1..=count {
        text.push_str(&format!("\n{n}. Service {n}"));
    }
    text.push_str(&format!("\n\n{tagline}"));
    Prompt::plain(text)
}

pub fn no_access() -> Prompt {
    Prompt::new(
        "You don't have access to this service. Please upgrade your level.",
        Some(Keyboard::Remove),
    )
}

pub fn approved(tier: PaidTier) -> Prompt {
    Prompt::new(
        format!("🎉 Congratulations!\n\nYour level has been approved as {tier}.\nYou can now use the {tier} services."),
        Some(main_menu(tier.into())),
    )
}

pub fn rejected(contact: &str) -> Prompt {
    Prompt::new(
        format!(
            "❌ Your payment could not be verified. Please try again, or contact {contact} if you think this is a mistake."
        ),
        Some(main_menu(AccessLevel::None)),
    )
}

/// Caption on the proof image sent to administrators.
pub fn admin_notice(record: &UserRecord, plan: &Plan, method: &PaymentMethod) -> String {
    let handle = if record.handle.is_empty() {
        "N/A"
    } else {
        record.handle.as_str()
    };
    format!(
        "🆕 Payment Screenshot from:\nUser: {}\nID: {}\nUsername: @{}\nPlan: {} ({})\nAmount: {}\nMethod: {}",
        record.display_name, record.user_id, handle, plan.name, plan.id, plan.price, method.name
    )
}

pub fn admin_decision_keyboard(user_id: UserId) -> Keyboard {
    let approve: Vec<Button> = PaidTier::ALL
        .iter()
        .map(|tier| Button::new(tier.as_str(), AdminAction::approve(user_id, *tier).callback()))
        .collect();
    Keyboard::Inline(vec![
        approve,
        vec![Button::new("Failed", AdminAction::reject(user_id).callback())],
    ])
}

pub fn admin_approved(user_id: UserId, tier: PaidTier, admin_id: UserId) -> String {
    format!("✅ Approved! User {user_id} is now {tier} level. (by {admin_id})")
}

pub fn admin_rejected(user_id: UserId, admin_id: UserId) -> String {
    format!("❌ Rejected! User {user_id} payment rejected. (by {admin_id})")
}

pub const UNAUTHORIZED: &str = "Unauthorized action.";
pub const ALREADY_HANDLED: &str = "This request has already been handled.";
pub const INVALID_ACTION: &str = "Invalid action.";
