use anyhow::{Context, Result};

use amora_realtime::{AppDirs, Credentials, FileSessionStore, SessionStore};

pub fn set_command(dirs: &AppDirs, user_id: &str, token: &str) -> Result<()> {
    let creds = Credentials::new(user_id.trim(), token.trim())
        .context("Both user id and token are required")?;
    let store = FileSessionStore::new(dirs.session_path());
    store
        .save(&creds)
        .with_context(|| format!("Failed to write {}", store.path().display()))?;
    println!("Signed in as {}", creds.user_id);
    Ok(())
}

pub fn show_command(dirs: &AppDirs) -> Result<()> {
    let store = FileSessionStore::new(dirs.session_path());
    match store.credentials() {
        Some(creds) => {
            println!("user:  {}", creds.user_id);
            println!("token: {}", mask_token(&creds.token));
        }
        None => println!("Not signed in"),
    }
    Ok(())
}

pub fn clear_command(dirs: &AppDirs) -> Result<()> {
    let store = FileSessionStore::new(dirs.session_path());
    store
        .clear()
        .with_context(|| format!("Failed to remove {}", store.path().display()))?;
    println!("Signed out");
    Ok(())
}

/// Keep only the last four characters visible.
fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dirs() -> (tempfile::TempDir, AppDirs) {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = AppDirs::new(Some(tmp.path().to_path_buf())).unwrap();
        (tmp, dirs)
    }

    #[test]
    fn mask_hides_all_but_tail() {
        assert_eq!(mask_token("abcdefgh"), "****efgh");
        assert_eq!(mask_token("abc"), "***");
    }

    #[test]
    fn set_then_clear() {
        let (_tmp, dirs) = dirs();
        set_command(&dirs, " u-1 ", "tok-123").unwrap();

        let store = FileSessionStore::new(dirs.session_path());
        let creds = store.credentials().unwrap();
        assert_eq!(creds.user_id, "u-1");
        assert_eq!(creds.token, "tok-123");

        clear_command(&dirs).unwrap();
        assert!(store.credentials().is_none());
        // Clearing twice is fine
        clear_command(&dirs).unwrap();
    }

    #[test]
    fn set_rejects_blank() {
        let (_tmp, dirs) = dirs();
        assert!(set_command(&dirs, "u-1", "  ").is_err());
        assert!(!dirs.session_path().exists());
    }
}
