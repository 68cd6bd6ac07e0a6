fn main() {
    #[cfg(feature = "backend-sql")]
    println!("cargo:rerun-if-changed=migrations");
}
