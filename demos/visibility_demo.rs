//! 可见性策略与关联状态机演示
//!
//! 不需要服务端：展示同一份资料在不同查看者面前的样子，以及关联请求的状态转换。

use facemed_core::{
    redact, Capabilities, ConnectionList, Identity, LinkRequest, LinkStatus, PrivacyFlag, Relationship, Role, Viewer,
};
use facemed_workflow::{LinkEvent, LinkPolicy, LinkStateMachine};
use uuid::Uuid;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    tracing_subscriber::fmt::init();

    println!("🚀 FaceMed 可见性策略演示\n");

    let mut subject: Identity = serde_json::from_value(serde_json::json!({
        "id": Uuid::new_v4(),
        "name": "Grace Hopper",
        "email": "grace@example.com",
        "phone": "5551234567",
        "gender": "female",
        "nationality": "US",
        "medical_info": { "allergies": "Penicillin" }
    }))?;

    for (label, viewer, role) in [
        ("本人", Viewer::subject(Role::User), Role::User),
        ("普通用户", Viewer::other(Role::User), Role::User),
        ("医生", Viewer::other(Role::Doctor), Role::Doctor),
    ] {
        let profile = redact(&subject, viewer, &Capabilities::for_role(role));
        println!("👤 {} 看到:", label);
        println!("{}\n", serde_json::to_string_pretty(&profile)?);
    }

    subject.privacy.set(PrivacyFlag::Name, false);
    let hidden = redact(&subject, Viewer::other(Role::User), &Capabilities::default());
    println!("🔒 隐藏姓名后普通用户看到: {} (private: {})\n", hidden.name, hidden.is_private_account());

    println!("🔗 关联请求状态机");
    let machine = LinkStateMachine::new();
    let accepted = machine.transition(LinkStatus::Pending, LinkEvent::Accept)?;
    println!("   pending --accept--> {}", accepted);
    match machine.transition(accepted, LinkEvent::Reject) {
        Ok(status) => println!("   accepted --reject--> {}", status),
        Err(e) => println!("   accepted --reject--> 拒绝: {}", e),
    }

    let me = Uuid::new_v4();
    let other = Uuid::new_v4();
    let pending = vec![LinkRequest {
        id: Uuid::new_v4(),
        sender_id: other,
        receiver_id: me,
        relationship: Relationship::Friend,
        status: LinkStatus::Pending,
        created_at: None,
        sender_name: Some("Alan".to_string()),
    }];
    let connections = ConnectionList::default();
    println!(
        "   与对方的状态: {:?}",
        LinkPolicy::status(me, other, &connections, &pending)
    );
    if let Err(e) = LinkPolicy::check(me, other, &connections, &pending) {
        println!("   再次发送请求: {}", e.user_message());
    }

    Ok(())
}
