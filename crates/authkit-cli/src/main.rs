use std::io;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use authkit_core::auth::{
    FileCredentialStore, LoginCredentials, OAuthBridge, OAuthProvider, RegisterCredentials,
    ResetPasswordCredentials, User,
};
use authkit_core::config::ClientConfig;
use authkit_core::http::{ApiError, Method, RequestOptions};
use authkit_core::AuthKit;
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::bridge::PastedToken;

mod bridge;

const DEFAULT_PROFILE: &str = "default";

#[derive(Parser, Debug)]
#[command(author, version, about = "Session and token management for authkit backends")]
struct Cli {
    /// API root; falls back to AUTHKIT_API_URL
    #[arg(long, global = true)]
    api_url: Option<String>,
    /// Profile name for stored credentials
    #[arg(long, global = true, default_value = DEFAULT_PROFILE)]
    profile: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sign-in, sign-out and password management
    #[command(subcommand)]
    Auth(AuthCommand),
    /// User account details
    #[command(subcommand)]
    User(UserCommand),
    /// Send an arbitrary JSON request with the stored session
    Request(RequestArgs),
    /// POST to a streaming endpoint and copy the body to stdout
    Stream(StreamArgs),
}

#[derive(Subcommand, Debug)]
enum AuthCommand {
    /// Sign in with email and password
    Login(LoginArgs),
    /// Sign in with an identity token obtained from Google or Apple
    Provider(ProviderArgs),
    /// Create an account and sign into it
    Register(RegisterArgs),
    /// Forget stored credentials for the profile
    Logout,
    /// Restore the stored session and report its state
    Status,
    /// Request a password reset email
    ForgotPassword(ForgotPasswordArgs),
    /// Set a new password with the identifiers from the reset email
    ResetPassword(ResetPasswordArgs),
}

#[derive(Subcommand, Debug)]
enum UserCommand {
    /// Show the signed-in user
    Me(MeArgs),
}

#[derive(Args, Debug)]
struct LoginArgs {
    #[arg(long)]
    email: String,
    /// Read from the terminal when omitted
    #[arg(long)]
    password: Option<String>,
}

#[derive(Args, Debug)]
struct ProviderArgs {
    /// google or apple
    #[arg(long)]
    provider: OAuthProvider,
    /// Identity token returned by the provider's sign-in
    #[arg(long)]
    token: String,
    #[arg(long = "first-name")]
    first_name: Option<String>,
    #[arg(long = "last-name")]
    last_name: Option<String>,
    #[arg(long)]
    email: Option<String>,
}

#[derive(Args, Debug)]
struct RegisterArgs {
    #[arg(long)]
    email: String,
    #[arg(long = "first-name", default_value = "")]
    first_name: String,
    /// Id of the user who sent the invitation
    #[arg(long = "inviter-id")]
    inviter_id: Option<String>,
    /// Confirm acceptance of the terms of service
    #[arg(long = "accept-terms")]
    accept_terms: bool,
}

#[derive(Args, Debug)]
struct ForgotPasswordArgs {
    #[arg(long)]
    email: String,
}

#[derive(Args, Debug)]
struct ResetPasswordArgs {
    #[arg(long = "user-id")]
    user_id: String,
    #[arg(long)]
    token: String,
}

#[derive(Args, Debug)]
struct MeArgs {
    /// Output raw JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct RequestArgs {
    /// HTTP method (GET, POST, PUT, PATCH, DELETE)
    #[arg(value_parser = parse_method)]
    method: Method,
    /// Endpoint path, may contain <name> placeholders
    endpoint: String,
    #[command(flatten)]
    shared: RequestShared,
}

#[derive(Args, Debug)]
struct StreamArgs {
    /// Endpoint path, may contain <name> placeholders
    endpoint: String,
    #[command(flatten)]
    shared: RequestShared,
}

#[derive(Args, Debug)]
struct RequestShared {
    /// JSON request body
    #[arg(long)]
    body: Option<String>,
    /// Path placeholder value as name=value (repeatable)
    #[arg(long = "param", value_parser = parse_pair)]
    params: Vec<(String, String)>,
    /// Query string pair as name=value (repeatable)
    #[arg(long = "query", value_parser = parse_pair)]
    query: Vec<(String, String)>,
    /// Extra header as name=value (repeatable)
    #[arg(long = "header", value_parser = parse_pair)]
    headers: Vec<(String, String)>,
    /// Send without the Authorization header
    #[arg(long = "skip-auth")]
    skip_auth: bool,
}

impl RequestShared {
    fn options(&self) -> RequestOptions {
        let mut options = RequestOptions::new();
        for (name, value) in &self.params {
            options = options.param(name, value);
        }
        for (name, value) in &self.query {
            options = options.query(name, value);
        }
        for (name, value) in &self.headers {
            options = options.header(name, value);
        }
        if self.skip_auth {
            options = options.skip_auth();
        }
        options
    }

    fn body(&self) -> Result<Option<Value>> {
        self.body
            .as_deref()
            .map(|raw| serde_json::from_str(raw).context("--body is not valid JSON"))
            .transpose()
    }
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, value)| (name.trim().to_owned(), value.to_owned()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))
}

fn parse_method(raw: &str) -> Result<Method, String> {
    Method::from_bytes(raw.to_ascii_uppercase().as_bytes())
        .map_err(|_| format!("invalid HTTP method '{raw}'"))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let bridge: Option<Arc<dyn OAuthBridge>> = match &cli.command {
        Commands::Auth(AuthCommand::Provider(args)) => Some(Arc::new(PastedToken::new(
            args.token.clone(),
            args.first_name.clone(),
            args.last_name.clone(),
            args.email.clone(),
        ))),
        _ => None,
    };
    let kit = connect(&cli, bridge)?;
    match cli.command {
        Commands::Auth(cmd) => match cmd {
            AuthCommand::Login(args) => auth_login(&kit, args).await?,
            AuthCommand::Provider(args) => auth_provider(&kit, args.provider).await?,
            AuthCommand::Register(args) => auth_register(&kit, args).await?,
            AuthCommand::Logout => auth_logout(&kit, &cli.profile)?,
            AuthCommand::Status => auth_status(&kit).await?,
            AuthCommand::ForgotPassword(args) => {
                kit.session()
                    .forgot_password(&args.email)
                    .await
                    .context("password reset request failed")?;
                println!("If {} has an account, a reset email is on its way.", args.email);
            }
            AuthCommand::ResetPassword(args) => auth_reset_password(&kit, args).await?,
        },
        Commands::User(UserCommand::Me(args)) => user_me(&kit, args).await?,
        Commands::Request(args) => request(&kit, args).await?,
        Commands::Stream(args) => stream(&kit, args).await?,
    }
    Ok(())
}

fn load_config(api_url: &Option<String>) -> Result<ClientConfig> {
    match api_url {
        Some(url) => ClientConfig::new(url).context("invalid --api-url"),
        None => ClientConfig::from_env().context("set AUTHKIT_API_URL or pass --api-url"),
    }
}

fn credential_store(profile: &str) -> Result<Arc<FileCredentialStore>> {
    let store = FileCredentialStore::with_default_locator(profile)
        .context("unable to initialise credential store")?;
    Ok(Arc::new(store))
}

fn connect(cli: &Cli, bridge: Option<Arc<dyn OAuthBridge>>) -> Result<AuthKit> {
    let config = load_config(&cli.api_url)?;
    AuthKit::connect_with(&config, credential_store(&cli.profile)?, bridge)
        .context("failed to build API client")
}

/// Restore the stored session, failing when nobody is signed in.
async fn require_session(kit: &AuthKit) -> Result<()> {
    kit.session().initialize().await;
    if !kit.session().is_authenticated() {
        bail!("not signed in; run `authkit auth login`");
    }
    Ok(())
}

fn read_password(prompt: &str) -> Result<String> {
    rpassword::prompt_password(prompt).context("failed to read password")
}

async fn auth_login(kit: &AuthKit, args: LoginArgs) -> Result<()> {
    let password = match args.password {
        Some(password) => password,
        None => read_password("Password: ")?,
    };
    let user = kit
        .session()
        .login(&LoginCredentials::new(args.email, password))
        .await
        .context("login failed")?;
    println!("Signed in as {}.", describe(&user));
    Ok(())
}

async fn auth_provider(kit: &AuthKit, provider: OAuthProvider) -> Result<()> {
    let user = kit
        .session()
        .login_with_provider(provider)
        .await
        .with_context(|| format!("{provider} sign-in failed"))?;
    println!("Signed in as {} via {provider}.", describe(&user));
    Ok(())
}

async fn auth_register(kit: &AuthKit, args: RegisterArgs) -> Result<()> {
    if !args.accept_terms {
        bail!("registration requires --accept-terms");
    }
    let password = read_password("Password: ")?;
    let password2 = read_password("Repeat password: ")?;
    let credentials = RegisterCredentials {
        email: args.email,
        password,
        password2,
        first_name: args.first_name,
        accept_terms: args.accept_terms,
    };
    let user = kit
        .session()
        .register(&credentials, args.inviter_id.as_deref())
        .await
        .context("registration failed")?;
    println!("Account created; signed in as {}.", describe(&user));
    Ok(())
}

fn auth_logout(kit: &AuthKit, profile: &str) -> Result<()> {
    kit.session()
        .logout()
        .context("failed to clear stored credentials")?;
    println!("Credentials removed for profile '{profile}'.");
    Ok(())
}

async fn auth_status(kit: &AuthKit) -> Result<()> {
    kit.session().initialize().await;
    let state = kit.session().state();
    match state.user {
        Some(user) => println!("Signed in as {}.", describe(&user)),
        None => println!("Not signed in."),
    }
    Ok(())
}

async fn auth_reset_password(kit: &AuthKit, args: ResetPasswordArgs) -> Result<()> {
    let credentials = ResetPasswordCredentials {
        password1: read_password("New password: ")?,
        password2: read_password("Repeat new password: ")?,
    };
    kit.session()
        .reset_password(&credentials, &args.user_id, &args.token)
        .await
        .context("password reset failed")?;
    println!("Password updated. Sign in with the new password.");
    Ok(())
}

async fn user_me(kit: &AuthKit, args: MeArgs) -> Result<()> {
    require_session(kit).await?;
    let user = kit
        .session()
        .state()
        .user
        .ok_or_else(|| anyhow!("session has no user"))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&user)?);
    } else {
        println!("User ID: {}", user.id);
        println!("Email: {}", user.email);
        let name = format!("{} {}", user.first_name, user.last_name);
        if !name.trim().is_empty() {
            println!("Name: {}", name.trim());
        }
        if let Some(created_at) = user.created_at {
            println!("Member since: {}", created_at.format("%Y-%m-%d"));
        }
        if user.is_staff {
            println!("Staff: yes");
        }
    }
    Ok(())
}

async fn request(kit: &AuthKit, args: RequestArgs) -> Result<()> {
    if !args.shared.skip_auth {
        kit.session().initialize().await;
    }
    let body = args.shared.body()?;
    debug!(method = %args.method, endpoint = %args.endpoint, "sending request");
    let response: Value = kit
        .api()
        .request(args.method.clone(), &args.endpoint, body, args.shared.options())
        .await
        .with_context(|| format!("{} {} failed", args.method, args.endpoint))?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn stream(kit: &AuthKit, args: StreamArgs) -> Result<()> {
    if !args.shared.skip_auth {
        kit.session().initialize().await;
    }
    let body = args.shared.body()?;

    let signal = CancellationToken::new();
    let trigger = signal.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    let options = args.shared.options().signal(signal);
    let mut body_stream = kit
        .api()
        .stream(&args.endpoint, body.as_ref(), options)
        .await
        .with_context(|| format!("stream {} failed", args.endpoint))?;

    let mut stdout = tokio::io::stdout();
    while let Some(chunk) = body_stream.next().await {
        match chunk {
            Ok(bytes) => {
                stdout.write_all(&bytes).await?;
                stdout.flush().await?;
            }
            Err(ApiError::Cancelled) => {
                eprintln!("\nstream cancelled");
                break;
            }
            Err(err) => return Err(err).context("stream interrupted"),
        }
    }
    Ok(())
}

fn describe(user: &User) -> String {
    let name = format!("{} {}", user.first_name, user.last_name);
    let name = name.trim();
    if name.is_empty() {
        user.email.clone()
    } else {
        format!("{name} <{}>", user.email)
    }
}
