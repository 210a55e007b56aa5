use super::*;

#[test]
fn edit_satisfies_view_and_edit() {
    assert!(Permission::Edit.satisfies(Permission::View));
    assert!(Permission::Edit.satisfies(Permission::Edit));
}

#[test]
fn view_satisfies_view_only() {
    assert!(Permission::View.satisfies(Permission::View));
    assert!(!Permission::View.satisfies(Permission::Edit));
}

#[test]
fn permission_roundtrip_str() {
    for permission in [Permission::View, Permission::Edit] {
        assert_eq!(Permission::parse(permission.as_str()), Some(permission));
    }
}

#[test]
fn permission_parse_invalid_returns_none() {
    assert_eq!(Permission::parse("admin"), None);
    assert_eq!(Permission::parse(""), None);
    assert_eq!(Permission::parse("EDIT"), None);
}

#[test]
fn owner_resolves_to_owned_regardless_of_share() {
    let owner = Uuid::new_v4();
    assert_eq!(PageAccess::resolve(owner, owner, None), Some(PageAccess::Owned));
    assert_eq!(PageAccess::resolve(owner, owner, Some(Permission::View)), Some(PageAccess::Owned));
}

#[test]
fn shared_permission_maps_to_variant() {
    let owner = Uuid::new_v4();
    let viewer = Uuid::new_v4();
    assert_eq!(PageAccess::resolve(owner, viewer, Some(Permission::View)), Some(PageAccess::SharedView));
    assert_eq!(PageAccess::resolve(owner, viewer, Some(Permission::Edit)), Some(PageAccess::SharedEdit));
}

#[test]
fn stranger_has_no_access() {
    assert_eq!(PageAccess::resolve(Uuid::new_v4(), Uuid::new_v4(), None), None);
}

#[test]
fn only_shared_view_is_read_only() {
    assert!(PageAccess::Owned.can_edit());
    assert!(PageAccess::SharedEdit.can_edit());
    assert!(!PageAccess::SharedView.can_edit());
}

#[test]
fn page_access_serializes_snake_case() {
    assert_eq!(serde_json::to_value(PageAccess::SharedEdit).unwrap(), "shared_edit");
    assert_eq!(PageAccess::SharedView.as_str(), "shared_view");
}
