pub fn run() {
    println!("dbmi {}", env!("CARGO_PKG_VERSION"));
}
