fn main() {
    if let Err(error) = ticker_desk_lib::run() {
        eprintln!("ticker-desk failed: {error}");
        std::process::exit(1);
    }
}
