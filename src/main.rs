fn main() {
    if let Err(err) = jiffyreader_lib::run() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}
