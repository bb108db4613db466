// Project intake: creation normalizes the stage and slug, persists the
// row, then runs the matcher synchronously. Authentication sits in front
// of this service and is not handled here.

pub mod handlers;
