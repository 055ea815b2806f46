//! systemd unit 文件模型与渲染
//!
//! 渲染是纯函数：相同输入产生逐字节相同的输出，`ensure_file_is` 的变更检测依赖这一点

/// unit 文件：有序的 section 列表
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UnitFile {
    sections: Vec<UnitSection>,
}

/// 一个 section：有序的 `Key=Value` 列表，数组值展开为多行
#[derive(Clone, Debug, PartialEq)]
pub struct UnitSection {
    name: String,
    entries: Vec<(String, Vec<String>)>,
}

impl UnitSection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    /// 设置单值键
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.push((key.into(), vec![value.into()]));
        self
    }

    /// 设置可选键，`None` 时不输出
    pub fn set_opt(self, key: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => self.set(key, value),
            None => self,
        }
    }

    /// 设置数组键，空数组时不输出
    pub fn set_all<I, S>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        if !values.is_empty() {
            self.entries.push((key.into(), values));
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn render_into(&self, out: &mut String) {
        out.push_str(&format!("[{}]\n", self.name));
        for (key, values) in &self.entries {
            for value in values {
                out.push_str(&format!("{}={}\n", key, value));
            }
        }
    }
}

impl UnitFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn section(mut self, section: UnitSection) -> Self {
        self.sections.push(section);
        self
    }

    pub fn sections(&self) -> &[UnitSection] {
        &self.sections
    }

    /// 渲染为 ini 文本，section 之间以空行分隔
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, section) in self.sections.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            section.render_into(&mut out);
        }
        out
    }
}

/// `Restart=` 策略
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartPolicy {
    Always,
    OnFailure,
    OnAbnormal,
    OnWatchdog,
    OnAbort,
    No,
}

impl RestartPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartPolicy::Always => "always",
            RestartPolicy::OnFailure => "on-failure",
            RestartPolicy::OnAbnormal => "on-abnormal",
            RestartPolicy::OnWatchdog => "on-watchdog",
            RestartPolicy::OnAbort => "on-abort",
            RestartPolicy::No => "no",
        }
    }
}

/// `Type=` 取值
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceType {
    Simple,
    Forking,
    Oneshot,
    Dbus,
    Notify,
    Idle,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Simple => "simple",
            ServiceType::Forking => "forking",
            ServiceType::Oneshot => "oneshot",
            ServiceType::Dbus => "dbus",
            ServiceType::Notify => "notify",
            ServiceType::Idle => "idle",
        }
    }
}

/// 常用的 service unit 描述
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceUnit {
    pub description: String,
    pub after: Vec<String>,
    pub exec_start: String,
    pub working_directory: Option<String>,
    pub user: Option<String>,
    pub group: Option<String>,
    pub restart: Option<RestartPolicy>,
    pub environment: Vec<String>,
    pub environment_file: Vec<String>,
    pub service_type: Option<ServiceType>,
    pub exec_start_pre: Vec<String>,
    pub exec_start_post: Vec<String>,
    pub exec_reload: Option<String>,
    pub exec_stop: Option<String>,
    pub wanted_by: String,
}

impl ServiceUnit {
    pub fn new(description: impl Into<String>, exec_start: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            after: Vec::new(),
            exec_start: exec_start.into(),
            working_directory: None,
            user: None,
            group: None,
            restart: None,
            environment: Vec::new(),
            environment_file: Vec::new(),
            service_type: None,
            exec_start_pre: Vec::new(),
            exec_start_post: Vec::new(),
            exec_reload: None,
            exec_stop: None,
            wanted_by: "multi-user.target".to_string(),
        }
    }

    /// 追加一个环境变量，值含空白或引号时整体加引号
    pub fn env(mut self, key: &str, value: &str) -> Self {
        let assignment = format!("{}={}", key, value);
        let needs_quotes = assignment
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '\\');
        if needs_quotes {
            let escaped = assignment.replace('\\', "\\\\").replace('"', "\\\"");
            self.environment.push(format!("\"{}\"", escaped));
        } else {
            self.environment.push(assignment);
        }
        self
    }

    pub fn to_unit_file(&self) -> UnitFile {
        let unit = UnitSection::new("Unit")
            .set("Description", self.description.clone())
            .set_all("After", self.after.iter().cloned());

        let service = UnitSection::new("Service")
            .set("ExecStart", self.exec_start.clone())
            .set_opt("WorkingDirectory", self.working_directory.clone())
            .set_opt("User", self.user.clone())
            .set_opt("Group", self.group.clone())
            .set_opt("Restart", self.restart.map(|r| r.as_str()))
            .set_all("Environment", self.environment.iter().cloned())
            .set_all("EnvironmentFile", self.environment_file.iter().cloned())
            .set_opt("Type", self.service_type.map(|t| t.as_str()))
            .set_all("ExecStartPre", self.exec_start_pre.iter().cloned())
            .set_all("ExecStartPost", self.exec_start_post.iter().cloned())
            .set_opt("ExecReload", self.exec_reload.clone())
            .set_opt("ExecStop", self.exec_stop.clone());

        let install = UnitSection::new("Install").set("WantedBy", self.wanted_by.clone());

        UnitFile::new().section(unit).section(service).section(install)
    }

    pub fn render(&self) -> String {
        self.to_unit_file().render()
    }
}

impl From<&ServiceUnit> for UnitFile {
    fn from(unit: &ServiceUnit) -> Self {
        unit.to_unit_file()
    }
}

impl From<ServiceUnit> for UnitFile {
    fn from(unit: ServiceUnit) -> Self {
        unit.to_unit_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ServiceUnit {
        let mut unit = ServiceUnit::new("Daemon deployed by rdt to pi", "/usr/bin/node index.js");
        unit.working_directory = Some("/home/pi/.rdt/pi".to_string());
        unit.restart = Some(RestartPolicy::Always);
        unit.exec_start_pre = vec!["/bin/true".to_string(), "/bin/echo hi".to_string()];
        unit.env("NODE_ENV", "production").env("GREETING", "hello world")
    }

    #[test]
    fn test_render_layout() {
        let text = sample().render();
        assert_eq!(
            text,
            "[Unit]\n\
             Description=Daemon deployed by rdt to pi\n\
             \n\
             [Service]\n\
             ExecStart=/usr/bin/node index.js\n\
             WorkingDirectory=/home/pi/.rdt/pi\n\
             Restart=always\n\
             Environment=NODE_ENV=production\n\
             Environment=\"GREETING=hello world\"\n\
             ExecStartPre=/bin/true\n\
             ExecStartPre=/bin/echo hi\n\
             \n\
             [Install]\n\
             WantedBy=multi-user.target\n"
        );
    }

    #[test]
    fn test_render_is_deterministic() {
        assert_eq!(sample().render(), sample().render());
    }

    #[test]
    fn test_changing_one_field_changes_one_line() {
        let before = sample().render();
        let mut changed = sample();
        changed.restart = Some(RestartPolicy::OnFailure);
        let after = changed.render();

        let diff: Vec<(&str, &str)> = before
            .lines()
            .zip(after.lines())
            .filter(|(a, b)| a != b)
            .collect();
        assert_eq!(before.lines().count(), after.lines().count());
        assert_eq!(diff, vec![("Restart=always", "Restart=on-failure")]);
    }

    #[test]
    fn test_custom_sections_keep_declaration_order() {
        let file = UnitFile::new()
            .section(UnitSection::new("Unit").set("Description", "x"))
            .section(UnitSection::new("Timer").set_all("OnCalendar", ["daily", "weekly"]));
        assert_eq!(
            file.render(),
            "[Unit]\nDescription=x\n\n[Timer]\nOnCalendar=daily\nOnCalendar=weekly\n"
        );
        assert_eq!(file.sections()[1].name(), "Timer");
    }
}
