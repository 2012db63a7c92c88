//! Build script so embedded migrations are picked up when they change.

fn main() {
    println!("cargo:rerun-if-changed=migrations/");
}
