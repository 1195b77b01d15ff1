use matchday_core::UserId;
use matchday_server_api::auth::generate_jwt;

fn main() {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: make_token <user-uuid>");
        std::process::exit(1);
    }

    let user = match uuid::Uuid::parse_str(args[1].trim()) {
        Ok(id) => UserId(id),
        Err(e) => {
            eprintln!("Invalid user ID: {}", e);
            std::process::exit(1);
        }
    };

    println!("Bearer token for user [{}]:", user);
    println!("{}", generate_jwt(&user));
}
