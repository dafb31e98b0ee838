//! 通用校验工具
//!
//! 所有校验在本地完成，失败时返回 [`FacemedError::Validation`]，不会发出网络请求。

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{FacemedError, Result};

/// 密码最小长度
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// 姓名最小长度
pub const MIN_NAME_LENGTH: usize = 2;

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid whitespace pattern"))
}

fn phone_separators_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\s\-().]").expect("valid separator pattern"))
}

fn phone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\+?\d{10,15}$").expect("valid phone pattern"))
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-z0-9](?:[a-z0-9-]*[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]*[a-z0-9])?)+$")
            .expect("valid email pattern")
    })
}

/// 去除首尾空白并合并内部连续空白，结果为空时返回 None
pub fn sanitize_text(text: Option<&str>) -> Option<String> {
    let text = text?.trim();
    let collapsed = whitespace_re().replace_all(text, " ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed.into_owned())
    }
}

/// 校验并规范化邮箱（小写）
pub fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    if email.is_empty() {
        return Err(FacemedError::validation("email", "Email is required"));
    }
    if !email_re().is_match(&email) {
        return Err(FacemedError::validation("email", "Invalid email format"));
    }
    Ok(email)
}

/// 校验密码强度：长度和至少一个字母、一个数字
pub fn validate_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(FacemedError::validation("password", "Password is required"));
    }
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(FacemedError::validation(
            "password",
            format!("Password must be at least {} characters long", MIN_PASSWORD_LENGTH),
        ));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(FacemedError::validation("password", "Password must contain at least one number"));
    }
    if !password.chars().any(|c| c.is_alphabetic()) {
        return Err(FacemedError::validation("password", "Password must contain at least one letter"));
    }
    Ok(())
}

/// 校验电话号码，返回去除分隔符后的号码
///
/// 接受 `+1234567890`、`(123) 456-7890`、`123-456-7890` 等格式，要求10到15位数字。
pub fn validate_phone(phone: &str) -> Result<String> {
    if phone.trim().is_empty() {
        return Err(FacemedError::validation("phone", "Phone number is required"));
    }
    let cleaned = phone_separators_re().replace_all(phone, "");
    if !phone_re().is_match(&cleaned) {
        return Err(FacemedError::validation(
            "phone",
            "Invalid phone number format. Please provide a valid phone number (10-15 digits)",
        ));
    }
    Ok(cleaned.into_owned())
}

/// 校验姓名并返回清理后的值
pub fn validate_name(name: &str) -> Result<String> {
    match sanitize_text(Some(name)) {
        Some(name) if name.chars().count() >= MIN_NAME_LENGTH => Ok(name),
        _ => Err(FacemedError::validation(
            "name",
            format!("Name is required and must be at least {} characters", MIN_NAME_LENGTH),
        )),
    }
}

/// 搜索关键字至少两个字符
pub fn validate_search_query(query: &str) -> Result<String> {
    let query = query.trim();
    if query.chars().count() < 2 {
        return Err(FacemedError::validation(
            "q",
            "Search query must be at least 2 characters long",
        ));
    }
    Ok(query.to_string())
}
