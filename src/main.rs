fn main() {
    retype_cli::run_main();
}
