//! Testing helpers and mock utilities.
//!
//! Provides convenient constructors for mocked storage and platform clients.

use crate::directory::Member;
use crate::platform::{MessageHandle, MockChatPlatform, PlatformError};
use crate::storage::{DirectorySnapshot, MockDirectoryStore};

/// Create a mock directory store that performs no operations (noop).
///
/// - `load_directory` returns an empty snapshot
/// - `save_directory` returns `Ok(())`
/// - `check_connection` returns `Ok(())`
#[must_use]
pub fn mock_store_noop() -> MockDirectoryStore {
    let mut mock = MockDirectoryStore::new();

    mock.expect_load_directory()
        .returning(|| Ok(DirectorySnapshot::new()));

    mock.expect_save_directory().returning(|_| Ok(()));

    mock.expect_check_connection().returning(|| Ok(()));

    mock
}

/// Create a mock platform where every send and edit succeeds.
///
/// Sent messages get increasing message ids starting at 1.
/// `list_administrators` returns `admins`.
#[must_use]
pub fn mock_platform_ok(admins: Vec<Member>) -> MockChatPlatform {
    let mut mock = MockChatPlatform::new();
    let mut next_id = 0;

    mock.expect_send_message()
        .returning(move |chat_id, _, _, _| {
            next_id += 1;
            Ok(MessageHandle {
                chat_id,
                message_id: next_id,
            })
        });

    mock.expect_edit_message().returning(|_, _, _, _| Ok(()));

    mock.expect_list_administrators()
        .returning(move |_| Ok(admins.clone()));

    mock
}

/// Create a mock platform whose administrator lookup fails.
#[must_use]
pub fn mock_platform_lookup_denied() -> MockChatPlatform {
    let mut mock = MockChatPlatform::new();

    mock.expect_send_message().returning(|chat_id, _, _, _| {
        Ok(MessageHandle {
            chat_id,
            message_id: 1,
        })
    });
    mock.expect_edit_message().returning(|_, _, _, _| Ok(()));
    mock.expect_list_administrators()
        .returning(|_| Err(PlatformError::PermissionDenied("not enough rights".into())));

    mock
}
