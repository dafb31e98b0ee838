//! FaceMed 命令行客户端

use clap::{Args, Parser, Subcommand};
use facemed_client::{ClientConfig, FileCamera};
use facemed_core::{
    ConnectionId, ExternalContactDraft, ExternalContactUpdate, FacemedError, ImageUpload, PrivacyFlag,
    RegistrationRequest, Relationship, Result, Role, Session, UserListQuery,
};
use facemed_workflow::{AutoConfirm, Confirmer, ConnectionUpdate, FaceLoginFlow, FacemedApp, UpdateOutcome};
use serde::Serialize;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error};
use uuid::Uuid;

/// 人脸登录交互确认的密码尝试次数
const MAX_PASSWORD_ATTEMPTS: usize = 3;

/// FaceMed 命令行参数
#[derive(Parser, Debug)]
#[command(name = "facemed")]
#[command(about = "FaceMed 人脸识别医疗身份客户端")]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// 日志级别，覆盖配置文件
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// 跳过所有确认提示
    #[arg(short, long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 邮箱密码登录
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: Option<String>,
    },
    /// 人脸登录，匹配后需要输入密码确认
    FaceLogin {
        /// 人脸图像文件
        #[arg(long)]
        image: PathBuf,
        #[arg(long)]
        password: Option<String>,
    },
    /// 退出登录
    Logout,
    /// 显示当前会话
    Whoami,
    /// 注册新用户
    Register(RegisterArgs),
    /// 识别图像中的人脸
    Recognize {
        #[arg(long)]
        image: PathBuf,
    },
    /// 个人资料
    #[command(subcommand)]
    Profile(ProfileCommand),
    /// 隐私设置
    #[command(subcommand)]
    Privacy(PrivacyCommand),
    /// 联系人与关联请求
    #[command(subcommand)]
    Connections(ConnectionsCommand),
    /// 用户管理（管理员）
    #[command(subcommand)]
    Admin(AdminCommand),
    /// 检查服务端状态
    Health,
}

#[derive(Args, Debug)]
struct RegisterArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    email: String,
    #[arg(long)]
    password: Option<String>,
    #[arg(long)]
    phone: Option<String>,
    #[arg(long)]
    nationality: Option<String>,
    #[arg(long)]
    gender: Option<String>,
    #[arg(long)]
    id_number: Option<String>,
    /// 人脸图像文件，可重复指定
    #[arg(long = "face", required = true)]
    faces: Vec<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum ProfileCommand {
    /// 查看资料，省略ID时显示本人资料
    Show { user_id: Option<Uuid> },
    /// 按姓名搜索用户
    Search { query: String },
    /// 修改密码
    Password {
        #[arg(long)]
        current: Option<String>,
        #[arg(long)]
        new: String,
    },
    /// 删除本人账户
    Delete {
        #[arg(long)]
        password: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum PrivacyCommand {
    /// 显示当前隐私设置
    Show,
    /// 修改一项隐私设置
    Set {
        field: PrivacyFlag,
        /// true 公开，false 隐藏
        #[arg(action = clap::ArgAction::Set)]
        public: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConnectionsCommand {
    /// 列出所有联系人
    List,
    /// 待处理的关联请求
    Requests,
    /// 向注册用户发送关联请求
    Request { user_id: Uuid, relationship: Relationship },
    /// 接受关联请求
    Accept { request_id: Uuid },
    /// 拒绝关联请求
    Reject { request_id: Uuid },
    /// 添加外部联系人
    AddExternal {
        #[arg(long)]
        name: String,
        #[arg(long)]
        phone: String,
        #[arg(long)]
        address: Option<String>,
        #[arg(long)]
        relationship: Relationship,
    },
    /// 修改联系人
    Update {
        id: ConnectionId,
        #[arg(long)]
        relationship: Option<Relationship>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        address: Option<String>,
    },
    /// 删除联系人
    Delete { id: ConnectionId },
    /// 查询与若干用户的关联状态
    Status { user_ids: Vec<Uuid> },
}

#[derive(Subcommand, Debug)]
enum AdminCommand {
    /// 分页列出用户
    Users {
        #[arg(long, default_value = "1")]
        page: u32,
        #[arg(long, default_value = "20")]
        page_size: u32,
        #[arg(long)]
        query: Option<String>,
        #[arg(long)]
        role: Option<Role>,
    },
    /// 修改用户角色
    Role { user_id: Uuid, role: Role },
    /// 封禁用户
    Ban { user_id: Uuid },
    /// 解除封禁
    Unban { user_id: Uuid },
    /// 删除用户
    Delete { user_id: Uuid },
}

/// 从终端读取确认
struct StdinConfirmer;

impl Confirmer for StdinConfirmer {
    fn confirm(&self, prompt: &str) -> bool {
        match prompt_line(&format!("{} [y/N] ", prompt)) {
            Ok(answer) => matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes"),
            Err(e) => {
                debug!("Failed to read confirmation: {}", e);
                false
            }
        }
    }
}

fn prompt_line(prompt: &str) -> io::Result<String> {
    let mut stdout = io::stdout();
    stdout.write_all(prompt.as_bytes())?;
    stdout.flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn password_or_prompt(password: Option<String>, label: &str) -> Result<String> {
    match password {
        Some(password) => Ok(password),
        None => Ok(prompt_line(&format!("{}: ", label))?),
    }
}

/// 密码确认；交互输入时密码错误可重新输入
async fn confirm_face_login(flow: &mut FaceLoginFlow, password: Option<String>) -> Result<Session> {
    match password {
        Some(password) => flow.confirm(&password).await,
        None => {
            flow.confirm_with(MAX_PASSWORD_ATTEMPTS, |attempt| {
                if attempt > 1 {
                    eprintln!("{}", FacemedError::InvalidCredential(String::new()).user_message());
                }
                password_or_prompt(None, "Confirm with your password")
            })
            .await
        }
    }
}

fn read_image(path: &Path) -> Result<ImageUpload> {
    let bytes = std::fs::read(path)?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    Ok(ImageUpload::new(name, bytes))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_outcome(outcome: UpdateOutcome) {
    match outcome {
        UpdateOutcome::Updated => println!("Done."),
        UpdateOutcome::AlreadyGone { notice } => println!("{}", notice),
    }
}

async fn run(cli: Cli, app: FacemedApp) -> Result<()> {
    let confirmer: &dyn Confirmer = if cli.yes { &AutoConfirm } else { &StdinConfirmer };

    match cli.command {
        Command::Login { email, password } => {
            let password = password_or_prompt(password, "Password")?;
            let session = app.auth.login(&email, &password).await?;
            println!("Logged in as {} ({})", session.name, session.role);
        }
        Command::FaceLogin { image, password } => {
            let mut flow = app.face_login();
            let mut camera = FileCamera::new(image);
            let identity = flow.submit_from(&mut camera).await?;
            println!("Face matched: {}", identity.name);

            let session = confirm_face_login(&mut flow, password).await?;
            println!("Logged in as {} ({})", session.name, session.role);
        }
        Command::Logout => {
            app.auth.logout()?;
            println!("Logged out.");
        }
        Command::Whoami => match app.session().get() {
            Some(session) => println!("{} <{}> ({}) id={}", session.name, session.email, session.role, session.user_id),
            None => println!("Not logged in."),
        },
        Command::Register(args) => {
            let password = password_or_prompt(args.password, "Password")?;
            let images = args
                .faces
                .iter()
                .map(|path| read_image(path))
                .collect::<Result<Vec<_>>>()?;
            let request = RegistrationRequest {
                name: args.name,
                email: args.email,
                password,
                phone: args.phone,
                date_of_birth: None,
                nationality: args.nationality,
                gender: args.gender,
                id_number: args.id_number,
            };
            let receipt = app.registration.register(request, &images).await?;
            println!("{}", receipt.message);
        }
        Command::Recognize { image } => {
            let mut camera = FileCamera::new(image);
            let outcome = app.recognition.recognize_from(&mut camera).await?;
            print_json(&outcome)?;
        }
        Command::Profile(command) => match command {
            ProfileCommand::Show { user_id: Some(user_id) } => print_json(&app.profile.view(user_id).await?)?,
            ProfileCommand::Show { user_id: None } => print_json(&app.profile.own_profile().await?)?,
            ProfileCommand::Search { query } => print_json(&app.profile.search_users(&query).await?)?,
            ProfileCommand::Password { current, new } => {
                let current = password_or_prompt(current, "Current password")?;
                app.profile.change_password(&current, &new).await?;
                println!("Password changed.");
            }
            ProfileCommand::Delete { password } => {
                let password = password_or_prompt(password, "Password")?;
                app.profile.delete_account(&password, confirmer).await?;
                println!("Account deleted.");
            }
        },
        Command::Privacy(command) => match command {
            PrivacyCommand::Show => {
                let settings = match app.profile.privacy_settings() {
                    Some(settings) => settings,
                    None => app.profile.own_profile().await?.privacy,
                };
                print_json(&settings)?;
            }
            PrivacyCommand::Set { field, public } => {
                let settings = app.profile.set_privacy(field, public).await?;
                print_json(&settings)?;
            }
        },
        Command::Connections(command) => run_connections(&app, command, confirmer).await?,
        Command::Admin(command) => run_admin(&app, command, confirmer).await?,
        Command::Health => print_json(&app.http().health().await?)?,
    }

    Ok(())
}

async fn run_connections(app: &FacemedApp, command: ConnectionsCommand, confirmer: &dyn Confirmer) -> Result<()> {
    let manager = &app.connections;
    match command {
        ConnectionsCommand::List => print_json(&manager.refresh().await?)?,
        ConnectionsCommand::Requests => print_json(&manager.pending_requests().await?)?,
        ConnectionsCommand::Request { user_id, relationship } => {
            let request = manager.request_link(user_id, relationship).await?;
            println!("Request {} sent.", request.id);
        }
        ConnectionsCommand::Accept { request_id } => {
            manager.refresh().await?;
            let status = manager.accept(request_id).await?;
            println!("Request {}.", status);
        }
        ConnectionsCommand::Reject { request_id } => {
            manager.refresh().await?;
            let status = manager.reject(request_id).await?;
            println!("Request {}.", status);
        }
        ConnectionsCommand::AddExternal {
            name,
            phone,
            address,
            relationship,
        } => {
            let draft = ExternalContactDraft {
                name,
                phone,
                address,
                relationship,
            };
            print_json(&manager.add_external_contact(draft).await?)?;
        }
        ConnectionsCommand::Update {
            id,
            relationship,
            name,
            phone,
            address,
        } => {
            let update = match id {
                ConnectionId::Linked(_) => ConnectionUpdate::Linked(relationship.ok_or_else(|| {
                    FacemedError::validation("relationship", "Relationship is required for linked connections")
                })?),
                ConnectionId::External(_) => ConnectionUpdate::External(ExternalContactUpdate {
                    name,
                    phone,
                    address,
                    relationship,
                }),
            };
            manager.refresh().await?;
            print_outcome(manager.update(id, update).await?);
        }
        ConnectionsCommand::Delete { id } => {
            manager.refresh().await?;
            print_outcome(manager.delete(id, confirmer).await?);
        }
        ConnectionsCommand::Status { user_ids } => {
            manager.refresh().await?;
            print_json(&manager.statuses_for(&user_ids).await?)?;
        }
    }
    Ok(())
}

async fn run_admin(app: &FacemedApp, command: AdminCommand, confirmer: &dyn Confirmer) -> Result<()> {
    let admin = &app.admin;
    match command {
        AdminCommand::Users {
            page,
            page_size,
            query,
            role,
        } => {
            let page = admin
                .list_users(UserListQuery {
                    page,
                    page_size,
                    query,
                    role,
                })
                .await?;
            print_json(&page)?;
        }
        AdminCommand::Role { user_id, role } => {
            admin.set_role(user_id, role).await?;
            println!("Role updated.");
        }
        AdminCommand::Ban { user_id } => {
            admin.ban(user_id).await?;
            println!("User banned.");
        }
        AdminCommand::Unban { user_id } => {
            admin.unban(user_id).await?;
            println!("User unbanned.");
        }
        AdminCommand::Delete { user_id } => {
            admin.delete_user(user_id, confirmer).await?;
            println!("User deleted.");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ClientConfig::load(cli.config.as_deref())?;

    // 初始化日志
    let level = cli.log_level.clone().unwrap_or_else(|| config.logging.level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_writer(io::stderr)
        .init();

    let app = FacemedApp::from_config(&config)?;
    if let Err(e) = run(cli, app).await {
        error!("Command failed: {}", e);
        eprintln!("{}", e.user_message());
        std::process::exit(1);
    }

    Ok(())
}
