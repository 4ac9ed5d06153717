fn main() -> std::process::ExitCode {
    ravenrock_cli::run()
}
