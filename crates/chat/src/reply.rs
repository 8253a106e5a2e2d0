use serde::Serialize;

use rentdesk_agent::{AgentReply, ReplyStyle};

pub const START_TEXT: &str = "🤖 Chào bạn! Tôi là trợ lý GPT-4 trong nhóm.";

pub const HELP_TEXT: &str = "/start - Khởi động bot\n\
/help - Hiển thị trợ giúp\n\
/reset - Xoá lịch sử hội thoại\n\
/mentionall - Gọi tất cả thành viên tương tác\n\
/id - Lấy ID người dùng và nhóm\n\
/users - Danh sách người dùng đã tương tác\n\
/forgetme - Xoá dữ liệu của bạn khỏi bot\n\
\n\
Kho thiết bị:\n\
/devices - Danh sách thiết bị\n\
/available - Thiết bị còn trống\n\
/rent <mã> [số lượng] - Thuê thiết bị\n\
/return <mã> [số lượng] - Trả thiết bị\n\
/mine [tên] - Thiết bị đang thuê\n\
/who <mã> - Ai đang thuê thiết bị\n\
/info <mã hoặc mô tả> - Thông tin thiết bị\n\
/add <mã> [mô tả] [, số lượng] - Thêm hoặc cập nhật thiết bị\n\
/delete <mã> - Xoá thiết bị\n\
\n\
Có thể gửi danh sách nhiều dòng dạng `Máy ảnh Canon, 3` để cập nhật kho hàng loạt.";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum ParseMode {
    #[default]
    Plain,
    Markdown,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReplyMessage {
    pub chat_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<i64>,
    pub text: String,
    pub parse_mode: ParseMode,
}

impl ReplyMessage {
    pub fn plain(chat_id: i64, text: impl Into<String>) -> Self {
        Self { chat_id, reply_to_message_id: None, text: text.into(), parse_mode: ParseMode::Plain }
    }

    pub fn markdown(chat_id: i64, text: impl Into<String>) -> Self {
        Self { parse_mode: ParseMode::Markdown, ..Self::plain(chat_id, text) }
    }

    /// Preformatted block. Backticks inside would close the block early, so
    /// they become plain quotes.
    pub fn verbatim(chat_id: i64, text: &str) -> Self {
        Self::markdown(chat_id, format!("```\n{}\n```", text.replace('`', "'")))
    }

    pub fn from_agent(chat_id: i64, reply: AgentReply) -> Self {
        match reply.style {
            ReplyStyle::Plain => Self::plain(chat_id, reply.text),
            ReplyStyle::Markdown => Self::markdown(chat_id, reply.text),
            ReplyStyle::Verbatim => Self::verbatim(chat_id, &reply.text),
        }
    }

    pub fn reply_to(mut self, message_id: i64) -> Self {
        self.reply_to_message_id = Some(message_id);
        self
    }
}
