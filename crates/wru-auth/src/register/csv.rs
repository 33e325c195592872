//! CSV user table parsing and serialization.
//!
//! The table's header row names the columns; accepted aliases match the
//! `WRU_USER_<n>` environment keys. Quoted fields, embedded separators, and
//! CRLF line endings are handled.

use crate::AuthResult;
use crate::error::AuthError;
use crate::register::{FederatedAccount, ProviderKind, UserRecord};

/// Canonical header columns emitted by [`users_to_csv`].
const CANONICAL_HEADER: &str = "id,name,email,org,scopes,twitter,github,oidc";

/// Parses a CSV user table.
///
/// Returns the users plus non-fatal warnings (rows without an id are
/// skipped, not fatal).
///
/// # Errors
///
/// Returns [`AuthError::Configuration`] when the header has no id column or
/// a quoted field is left unterminated.
pub fn parse_user_csv(text: &str) -> AuthResult<(Vec<UserRecord>, Vec<String>)> {
    let mut records = parse_records(text)?.into_iter();
    let Some(header) = records.next() else {
        return Err(AuthError::configuration("user table is empty"));
    };

    let mut columns: Vec<Option<&'static str>> = Vec::with_capacity(header.len());
    for name in &header {
        columns.push(match name.trim() {
            "id" | "userid" => Some("id"),
            "name" => Some("name"),
            "mail" | "email" => Some("mail"),
            "org" | "organization" => Some("org"),
            "scope" | "scopes" => Some("scope"),
            "twitter" => Some("twitter"),
            "github" => Some("github"),
            "oidc" => Some("oidc"),
            _ => None,
        });
    }
    if !columns.contains(&Some("id")) {
        return Err(AuthError::configuration("user table has no id column"));
    }

    let mut users = Vec::new();
    let mut warnings = Vec::new();
    for (row_number, record) in records.enumerate() {
        let mut user = UserRecord {
            user_id: String::new(),
            display_name: String::new(),
            email: String::new(),
            organization: String::new(),
            scopes: Vec::new(),
            federated_accounts: Vec::new(),
        };
        for (field, column) in record.into_iter().zip(columns.iter()) {
            match column {
                Some("id") => user.user_id = field,
                Some("name") => user.display_name = field,
                Some("mail") => user.email = field,
                Some("org") => user.organization = field,
                Some("scope") => {
                    user.scopes.extend(
                        field
                            .split(',')
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(String::from),
                    );
                }
                Some("twitter") => push_account(&mut user, ProviderKind::Twitter, field),
                Some("github") => push_account(&mut user, ProviderKind::GitHub, field),
                Some("oidc") => push_account(&mut user, ProviderKind::Oidc, field),
                _ => {}
            }
        }
        if user.user_id.is_empty() {
            warnings.push(format!("user table row {} has no id, skipped", row_number + 2));
            continue;
        }
        users.push(user);
    }
    Ok((users, warnings))
}

fn push_account(user: &mut UserRecord, provider: ProviderKind, account: String) {
    if !account.is_empty() {
        user.federated_accounts
            .push(FederatedAccount { provider, account });
    }
}

/// Serializes users back into the canonical CSV shape.
///
/// `parse_user_csv(&users_to_csv(users))` reproduces the same user set.
#[must_use]
pub fn users_to_csv(users: &[UserRecord]) -> String {
    let mut out = String::from(CANONICAL_HEADER);
    out.push('\n');
    for user in users {
        let fields = [
            user.user_id.clone(),
            user.display_name.clone(),
            user.email.clone(),
            user.organization.clone(),
            user.scopes.join(","),
            federated_of(user, ProviderKind::Twitter),
            federated_of(user, ProviderKind::GitHub),
            federated_of(user, ProviderKind::Oidc),
        ];
        let row: Vec<String> = fields.iter().map(|f| escape_field(f)).collect();
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}

fn federated_of(user: &UserRecord, provider: ProviderKind) -> String {
    user.federated_accounts
        .iter()
        .find(|a| a.provider == provider)
        .map(|a| a.account.clone())
        .unwrap_or_default()
}

fn escape_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Splits CSV text into records of fields, honouring quotes.
fn parse_records(text: &str) -> AuthResult<Vec<Vec<String>>> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();
    let mut saw_any = false;

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => {
                in_quotes = true;
                saw_any = true;
            }
            ',' => {
                record.push(std::mem::take(&mut field));
                saw_any = true;
            }
            '\r' => {}
            '\n' => {
                if saw_any || !field.is_empty() || !record.is_empty() {
                    record.push(std::mem::take(&mut field));
                    records.push(std::mem::take(&mut record));
                }
                saw_any = false;
            }
            _ => {
                field.push(c);
                saw_any = true;
            }
        }
    }
    if in_quotes {
        return Err(AuthError::configuration("unterminated quote in user table"));
    }
    if saw_any || !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_table() {
        let text = "id,name,email,org,scopes,github\n\
                    u1,User One,u1@example.com,R&D,\"admin,user\",octo1\n\
                    u2,User Two,u2@example.com,Sales,user,\n";
        let (users, warnings) = parse_user_csv(text).unwrap();

        assert!(warnings.is_empty());
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].user_id, "u1");
        assert_eq!(users[0].scopes, vec!["admin", "user"]);
        assert_eq!(users[0].federated_accounts.len(), 1);
        assert_eq!(users[0].federated_accounts[0].account, "octo1");
        // empty github cell adds no federated account
        assert!(users[1].federated_accounts.is_empty());
    }

    #[test]
    fn test_header_aliases() {
        let text = "userid,mail,organization,scope\nu1,a@b.c,Org,admin\n";
        let (users, _) = parse_user_csv(text).unwrap();
        assert_eq!(users[0].user_id, "u1");
        assert_eq!(users[0].email, "a@b.c");
        assert_eq!(users[0].organization, "Org");
        assert_eq!(users[0].scopes, vec!["admin"]);
    }

    #[test]
    fn test_missing_id_column_is_fatal() {
        let err = parse_user_csv("name,email\nUser,a@b.c\n").unwrap_err();
        assert!(err.to_string().contains("no id column"));
    }

    #[test]
    fn test_row_without_id_warns() {
        let text = "id,name\nu1,One\n,Anonymous\n";
        let (users, warnings) = parse_user_csv(text).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("row 3"));
    }

    #[test]
    fn test_quoted_fields() {
        let text = "id,name\nu1,\"Last, First\"\nu2,\"Says \"\"hi\"\"\"\n";
        let (users, _) = parse_user_csv(text).unwrap();
        assert_eq!(users[0].display_name, "Last, First");
        assert_eq!(users[1].display_name, "Says \"hi\"");
    }

    #[test]
    fn test_crlf_line_endings() {
        let text = "id,name\r\nu1,One\r\n";
        let (users, _) = parse_user_csv(text).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].display_name, "One");
    }

    #[test]
    fn test_round_trip_identity() {
        let text = "id,name,email,org,scopes,twitter,github,oidc\n\
                    u1,\"One, The\",u1@example.com,R&D,\"admin,user\",tw1,gh1,u1@idp\n\
                    u2,Two,u2@example.com,,user,,gh2,\n";
        let (users, _) = parse_user_csv(text).unwrap();
        let (reparsed, warnings) = parse_user_csv(&users_to_csv(&users)).unwrap();

        assert!(warnings.is_empty());
        assert_eq!(users, reparsed);
    }
}
