// Entity types of the school-management platform. Collection overrides are
// part of the persisted naming contract; do not rename them.

use super::EntitySchema;

pub const USER: &str = "User";
pub const ACTIVITY: &str = "Activity";
pub const NOTIFICATION: &str = "Notification";

pub fn school_entities() -> Vec<EntitySchema> {
    vec![
        EntitySchema::new(USER).reference("branch", "Branch"),
        EntitySchema::new("Branch"),
        EntitySchema::new("Taxi")
            .reference("branch", "Branch")
            .reference("teacher", "User")
            .reference("students", "User")
            .with_ownership(),
        EntitySchema::new("Class")
            .with_collection("classes")
            .reference("branch", "Branch")
            .with_ownership(),
        EntitySchema::new("Session")
            .reference("taxi", "Taxi")
            .reference("branch", "Branch")
            .with_ownership(),
        EntitySchema::new("Assignment")
            .reference("taxi", "Taxi")
            .reference("session", "Session")
            .with_ownership()
            .owned_array("submissions"),
        EntitySchema::new("Post")
            .reference("author", "User")
            .reference("branch", "Branch")
            .with_ownership()
            .owned_array("comments"),
        EntitySchema::new("Inventory")
            .with_collection("inventory")
            .reference("branch", "Branch")
            .with_ownership(),
        EntitySchema::new(ACTIVITY).reference("actor", "User"),
        EntitySchema::new(NOTIFICATION).reference("recipient", "User"),
    ]
}
