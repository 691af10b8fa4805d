//! Fixed French texts used in outgoing mails.
//!
//! Keeping the wording here means a change to the greeting or sign-off
//! touches exactly one place, and tests can check the rendered body without
//! building a message.

use crate::config::MailProfile;
use minijinja::{context, AutoEscape, Environment, Value};

/// Mail body template. Variables: `name`, `club`, `season`, `signature`.
pub const MAIL_BODY_TEMPLATE: &str = r#"
<p>
    Bonjour {{ name }},
</p>
<p>
    Veuillez trouver ci-joint la facture correspondant à votre adhésion au club du <b>{{ club }} pour la saison {{ season }}</b>.
</p>
<p>Cordialement,
    <br/>{{ signature }}
</p>
"#;

/// Render the HTML mail body for one recipient.
///
/// Every value is HTML-escaped except the season label, which is produced
/// by [`season_for`](crate::config::season_for) or given on the command line
/// and only holds digits and a slash.
pub fn mail_body(
    recipient_name: &str,
    season: &str,
    profile: &MailProfile,
) -> Result<String, minijinja::Error> {
    let mut env = Environment::new();
    env.set_auto_escape_callback(|_| AutoEscape::Html);
    env.render_str(
        MAIL_BODY_TEMPLATE,
        context! {
            name => recipient_name,
            club => &profile.club,
            season => Value::from_safe_string(season.to_string()),
            signature => &profile.signature,
        },
    )
}
