pub mod mailer;
pub mod telegram;
pub mod traits;

pub use mailer::HttpMailer;
pub use telegram::TelegramSender;
pub use traits::{EmailSender, MessageSender};
