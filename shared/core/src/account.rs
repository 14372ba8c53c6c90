//! The account store (spec component B): on-disk layout for one account,
//! plus the friend-graph and file operations that hang off it.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::addressing;
use crate::error::{Error, Result};
use crate::file::File;
use crate::friend::Friend;
use crate::identity::{Fingerprint, KeyPair, RsaBits};

const MAU_DIR: &str = ".mau";
const ACCOUNT_FILE: &str = "account.pgp";
const FRIENDS_DIR: &str = "friends";

/// A persistent identity rooted at a filesystem directory.
///
/// `Client` and `Server` hold a shared, read-only reference to an
/// `Account`; friend-graph mutations go through the methods here, which
/// serialize concurrent callers with an internal mutex rather than
/// requiring callers to coordinate themselves.
pub struct Account {
    dir: PathBuf,
    keypair: KeyPair,
    fingerprint: Fingerprint,
    friends_lock: Mutex<()>,
}

impl Account {
    /// Creates a brand-new account at `dir`, generating a fresh keypair.
    pub fn new(dir: impl Into<PathBuf>, name: &str, email: &str, passphrase: &str) -> Result<Self> {
        Self::new_with_bits(dir, name, email, passphrase, RsaBits::default())
    }

    /// As [`Account::new`], but with an explicit RSA key size. Exists so
    /// tests can ask for a small key instead of threading a process-global
    /// key-length setting through key generation.
    pub fn new_with_bits(
        dir: impl Into<PathBuf>,
        name: &str,
        email: &str,
        passphrase: &str,
        bits: RsaBits,
    ) -> Result<Self> {
        if passphrase.is_empty() {
            return Err(Error::PassphraseRequired);
        }

        let dir = dir.into();
        let mau_dir = dir.join(MAU_DIR);
        let account_path = mau_dir.join(ACCOUNT_FILE);
        if account_path.exists() {
            return Err(Error::AccountAlreadyExists);
        }

        let keypair = KeyPair::generate(name, email, passphrase, bits)?;
        let fingerprint = keypair.fingerprint()?;
        let locked = keypair.lock(passphrase)?;

        fs::create_dir_all(&mau_dir)?;
        fs::create_dir_all(mau_dir.join(FRIENDS_DIR))?;
        write_new_file(&account_path, &locked)?;
        fs::create_dir_all(dir.join(fingerprint.to_hex()))?;

        Ok(Self {
            dir,
            keypair,
            fingerprint,
            friends_lock: Mutex::new(()),
        })
    }

    /// Opens an existing account, decrypting its private key.
    pub fn open(dir: impl Into<PathBuf>, passphrase: &str) -> Result<Self> {
        let dir = dir.into();
        let account_path = dir.join(MAU_DIR).join(ACCOUNT_FILE);
        if !account_path.exists() {
            return Err(Error::NotFound);
        }

        let locked = fs::read(&account_path)?;
        let keypair = KeyPair::unlock(&locked, passphrase)?;
        let fingerprint = keypair.fingerprint()?;

        Ok(Self {
            dir,
            keypair,
            fingerprint,
            friends_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn identity(&self) -> Result<String> {
        self.keypair.identity()
    }

    pub fn name(&self) -> Result<String> {
        self.keypair.name()
    }

    pub fn email(&self) -> Result<String> {
        self.keypair.email()
    }

    pub fn export_public(&self) -> Result<Vec<u8>> {
        self.keypair.export_public()
    }

    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    /// The directory holding this account's own published files.
    pub fn own_dir(&self) -> PathBuf {
        self.dir.join(self.fingerprint.to_hex())
    }

    /// The mirror directory for a friend's files, whether or not it's
    /// currently followed.
    pub fn friend_dir(&self, fingerprint: Fingerprint) -> PathBuf {
        self.dir.join(fingerprint.to_hex())
    }

    fn friend_key_path(&self, fingerprint: Fingerprint) -> PathBuf {
        self.dir.join(MAU_DIR).join(FRIENDS_DIR).join(format!("{}.pgp", fingerprint.to_hex()))
    }

    /// Parses a public key blob, derives its fingerprint, and persists it
    /// under `.mau/friends/<fpr>.pgp`. Idempotent.
    pub fn add_friend(&self, key_blob: &[u8]) -> Result<Friend> {
        let public_key = KeyPair::from_public_bytes(key_blob)?;
        let fingerprint = public_key.fingerprint()?;

        let _guard = self.friends_lock.lock().unwrap();
        let path = self.friend_key_path(fingerprint);
        if !path.exists() {
            write_new_file(&path, key_blob)?;
        }

        Ok(Friend::new(public_key))
    }

    /// Lists known friends by reading `.mau/friends/`.
    pub fn friends(&self) -> Result<Vec<Friend>> {
        let dir = self.dir.join(MAU_DIR).join(FRIENDS_DIR);
        let mut friends = Vec::new();
        if !dir.exists() {
            return Ok(friends);
        }
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) != Some("pgp") {
                continue;
            }
            let bytes = fs::read(entry.path())?;
            let public_key = KeyPair::from_public_bytes(&bytes)?;
            friends.push(Friend::new(public_key));
        }
        Ok(friends)
    }

    /// Creates the friend's mirror directory, marking them followed.
    /// Idempotent.
    pub fn follow(&self, friend: &Friend) -> Result<()> {
        let _guard = self.friends_lock.lock().unwrap();
        let fingerprint = friend.fingerprint()?;
        fs::create_dir_all(self.friend_dir(fingerprint))?;
        Ok(())
    }

    /// Removes the friend's mirror directory, marking them not followed.
    /// Idempotent.
    pub fn unfollow(&self, friend: &Friend) -> Result<()> {
        let _guard = self.friends_lock.lock().unwrap();
        let fingerprint = friend.fingerprint()?;
        let dir = self.friend_dir(fingerprint);
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn is_followed(&self, fingerprint: Fingerprint) -> bool {
        self.friend_dir(fingerprint).is_dir()
    }

    /// Encrypts `plaintext` from `stream` for every `recipient` and for
    /// this account, and writes it to `<own-dir>/<name>.pgp`.
    pub fn add_file(
        &self,
        mut stream: impl Read,
        name: &str,
        recipients: &[Friend],
    ) -> Result<File> {
        let mut plaintext = Vec::new();
        stream.read_to_end(&mut plaintext)?;

        let mut targets = vec![self.keypair.cert()];
        for friend in recipients {
            targets.push(friend.public_key().cert());
        }

        let ciphertext = addressing::encrypt_for(&plaintext, &targets)?;

        let own_dir = self.own_dir();
        fs::create_dir_all(&own_dir)?;
        let file_name = format!("{name}.pgp");
        let path = own_dir.join(&file_name);
        write_atomic(&path, &ciphertext)?;

        Ok(File::new(path, file_name))
    }
}

/// Writes `bytes` to `path`, failing if something raced us and created it
/// first. Used for the account's own key and friend blobs, which must
/// never silently clobber existing content.
fn write_new_file(path: &Path, bytes: &[u8]) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io::Write;

    #[cfg(unix)]
    let mut file = {
        use std::os::unix::fs::OpenOptionsExt;
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(path)?
    };
    #[cfg(not(unix))]
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;

    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

/// Write-and-rename: `path` either has its old content or its new content,
/// never a partial write, and ends up mode 0600.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io::Write;

    let tmp_path = path.with_extension("tmp");

    #[cfg(unix)]
    let mut tmp = {
        use std::os::unix::fs::OpenOptionsExt;
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&tmp_path)?
    };
    #[cfg(not(unix))]
    let mut tmp = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;

    if let Err(e) = tmp.write_all(bytes).and_then(|_| tmp.sync_all()) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    drop(tmp);

    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::RsaBits;

    fn small_account(dir: &Path, name: &str, email: &str, pass: &str) -> Account {
        Account::new_with_bits(dir, name, email, pass, RsaBits::B1024).unwrap()
    }

    #[test]
    fn create_then_reopen_same_fingerprint() {
        let tmp = tempfile::tempdir().unwrap();
        let created = small_account(tmp.path(), "Ahmed Mohamed", "ahmed@example.com", "strong password");
        let fingerprint = created.fingerprint();
        drop(created);

        let reopened = Account::open(tmp.path(), "strong password").unwrap();
        assert_eq!(reopened.fingerprint(), fingerprint);
        assert_eq!(reopened.identity().unwrap(), "Ahmed Mohamed <ahmed@example.com>");
    }

    #[test]
    fn duplicate_create_fails() {
        let tmp = tempfile::tempdir().unwrap();
        small_account(tmp.path(), "A", "a@example.com", "pw");
        let err = Account::new_with_bits(tmp.path(), "A", "a@example.com", "pw", RsaBits::B1024).unwrap_err();
        assert!(matches!(err, Error::AccountAlreadyExists));
    }

    #[test]
    fn empty_passphrase_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let err = Account::new_with_bits(tmp.path(), "A", "a@example.com", "", RsaBits::B1024).unwrap_err();
        assert!(matches!(err, Error::PassphraseRequired));
    }

    #[test]
    fn open_with_wrong_passphrase_fails() {
        let tmp = tempfile::tempdir().unwrap();
        small_account(tmp.path(), "A", "a@example.com", "right");
        let err = Account::open(tmp.path(), "wrong").unwrap_err();
        assert!(matches!(err, Error::BadPassphrase));
    }

    #[test]
    fn open_missing_account_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let err = Account::open(tmp.path(), "pw").unwrap_err();
        assert!(matches!(err, Error::NotFound));
    }

    #[test]
    fn distinct_dirs_yield_distinct_fingerprints() {
        let tmp_a = tempfile::tempdir().unwrap();
        let tmp_b = tempfile::tempdir().unwrap();
        let a = small_account(tmp_a.path(), "A", "a@example.com", "pw");
        let b = small_account(tmp_b.path(), "A", "a@example.com", "pw");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn add_friend_is_idempotent() {
        let tmp_a = tempfile::tempdir().unwrap();
        let tmp_b = tempfile::tempdir().unwrap();
        let a = small_account(tmp_a.path(), "A", "a@example.com", "pw");
        let b = small_account(tmp_b.path(), "B", "b@example.com", "pw");

        let key_blob = b.export_public().unwrap();
        let f1 = a.add_friend(&key_blob).unwrap();
        let f2 = a.add_friend(&key_blob).unwrap();
        assert_eq!(f1.fingerprint().unwrap(), f2.fingerprint().unwrap());
        assert_eq!(a.friends().unwrap().len(), 1);
    }

    #[test]
    fn follow_unfollow_toggle_mirror_directory() {
        let tmp_a = tempfile::tempdir().unwrap();
        let tmp_b = tempfile::tempdir().unwrap();
        let a = small_account(tmp_a.path(), "A", "a@example.com", "pw");
        let b = small_account(tmp_b.path(), "B", "b@example.com", "pw");

        let friend = a.add_friend(&b.export_public().unwrap()).unwrap();
        assert!(!a.is_followed(friend.fingerprint().unwrap()));

        a.follow(&friend).unwrap();
        assert!(a.is_followed(friend.fingerprint().unwrap()));

        a.unfollow(&friend).unwrap();
        assert!(!a.is_followed(friend.fingerprint().unwrap()));
    }

    #[test]
    fn add_file_is_decryptable_by_recipient_only() {
        let tmp_a = tempfile::tempdir().unwrap();
        let tmp_b = tempfile::tempdir().unwrap();
        let tmp_m = tempfile::tempdir().unwrap();
        let a = small_account(tmp_a.path(), "A", "a@example.com", "pw");
        let b = small_account(tmp_b.path(), "B", "b@example.com", "pw");
        let mallory = small_account(tmp_m.path(), "M", "m@example.com", "pw");

        let recipient = a.add_friend(&b.export_public().unwrap()).unwrap();
        let file = a
            .add_file("Hello world!".as_bytes(), "hello.txt", &[recipient])
            .unwrap();

        assert_eq!(file.name(), "hello.txt.pgp");
        let ciphertext = fs::read(file.path()).unwrap();

        let plaintext = crate::addressing::decrypt_with(b.keypair(), &ciphertext).unwrap();
        assert_eq!(plaintext, b"Hello world!");

        assert!(crate::addressing::decrypt_with(mallory.keypair(), &ciphertext).is_err());
    }

    #[test]
    fn add_file_with_no_recipients_is_owner_only() {
        let tmp_a = tempfile::tempdir().unwrap();
        let tmp_b = tempfile::tempdir().unwrap();
        let a = small_account(tmp_a.path(), "A", "a@example.com", "pw");
        let b = small_account(tmp_b.path(), "B", "b@example.com", "pw");

        let file = a.add_file("Private data".as_bytes(), "private.txt", &[]).unwrap();
        let ciphertext = fs::read(file.path()).unwrap();

        assert_eq!(
            crate::addressing::decrypt_with(a.keypair(), &ciphertext).unwrap(),
            b"Private data"
        );
        assert!(crate::addressing::decrypt_with(b.keypair(), &ciphertext).is_err());
    }
}
