//! Cloud-config templates.
//!
//! NOTE WELL: changing these templates changes the rendered configuration of every node of
//! every cluster, which rolls all VMs. Behavior changes must be gated on a bundle.

/// The template shared by all roles, holding files, units & verbatim sections.
macro_rules! cloudconfig_template {
    ($role_files:literal) => {
        concat!(
            r#"#cloud-config
hostname: {{ role }}-{{ node_id }}
users:
  - name: giantswarm
    groups:
      - sudo
      - docker
write_files:
  - path: /etc/kubernetes/cluster.env
    owner: root:root
    permissions: "0644"
    content: |
      CLUSTER_ID={{ cluster_id }}
      NODE_ID={{ node_id }}
      ROLE={{ role }}
      API_DOMAIN={{ api_domain }}
      BASE_DOMAIN={{ base_domain }}
      ETCD_DOMAIN={{ etcd_domain }}
      ETCD_PORT={{ etcd_port }}
      FLANNEL_VNI={{ flannel_vni }}
  - path: /etc/kubernetes/manifests/k8s-kubelet.env
    owner: root:root
    permissions: "0644"
    content: |
      KUBELET_IMAGE={{ registry_domain }}/giantswarm/hyperkube:v{{ kubernetes_version }}
      KUBELET_ROLE={{ role }}
      KUBELET_CLUSTER_DOMAIN=cluster.local
      KUBELET_API_SERVER=https://{{ api_domain }}
"#,
            $role_files,
            r#"{% for file in files %}
  - path: {{ file.path }}
    owner: {{ file.owner }}
    permissions: "{{ file.permissions }}"
    encoding: base64
    content: {{ file.content }}
{% endfor %}
coreos:
  units:
{% for unit in units %}
    - name: {{ unit.name }}
      enable: {{ unit.enable }}
{% if unit.command %}
      command: {{ unit.command }}
{% endif %}
{% if unit.content %}
      content: |
        {{ unit.content | indent(8) }}
{% endif %}
{% endfor %}
  update:
    reboot-strategy: "off"
{% for section in verbatim %}
{{ section.content }}
{% endfor %}
"#
        )
    };
}

/// The template of master nodes.
pub const MASTER: &str = cloudconfig_template!(
    r#"  - path: /etc/kubernetes/manifests/k8s-api-server.yaml
    owner: root:root
    permissions: "0644"
    content: |
      apiVersion: v1
      kind: Pod
      metadata:
        name: k8s-api-server
        namespace: kube-system
      spec:
        hostNetwork: true
        priorityClassName: system-node-critical
        containers:
          - name: k8s-api-server
            image: {{ registry_domain }}/giantswarm/hyperkube:v{{ kubernetes_version }}
            command:
              - /hyperkube
              - kube-apiserver
              - --etcd-servers=https://127.0.0.1:2379
              - --etcd-cafile=/etc/kubernetes/ssl/etcd-ca.pem
              - --etcd-certfile=/etc/kubernetes/ssl/etcd-crt.pem
              - --etcd-keyfile=/etc/kubernetes/ssl/etcd-key.pem
              - --tls-cert-file=/etc/kubernetes/ssl/api-crt.pem
              - --tls-private-key-file=/etc/kubernetes/ssl/api-key.pem
              - --client-ca-file=/etc/kubernetes/ssl/api-ca.pem
              - --service-account-key-file=/etc/kubernetes/ssl/service-account-key.pem
              - --encryption-provider-config=/etc/kubernetes/encryption/k8s-encryption-config.yaml
              - --secure-port=443
{% for arg in api_server_extra_args %}
              - {{ arg }}
{% endfor %}
  - path: /etc/kubernetes/manifests/etcd.yaml
    owner: root:root
    permissions: "0644"
    content: |
      apiVersion: v1
      kind: Pod
      metadata:
        name: etcd
        namespace: kube-system
      spec:
        hostNetwork: true
        containers:
          - name: etcd
            image: {{ registry_domain }}/giantswarm/etcd:v{{ etcd_version }}
            command:
              - etcd
              - --name=etcd-{{ node_id }}
              - --data-dir=/var/lib/etcd
              - --listen-client-urls=https://0.0.0.0:2379
              - --advertise-client-urls=https://{{ etcd_domain }}:{{ etcd_port }}
              - --cert-file=/etc/kubernetes/ssl/etcd-crt.pem
              - --key-file=/etc/kubernetes/ssl/etcd-key.pem
              - --trusted-ca-file=/etc/kubernetes/ssl/etcd-ca.pem
              - --client-cert-auth=true
"#
);

/// The template of worker nodes.
pub const WORKER: &str = cloudconfig_template!(
    r#"  - path: /etc/kubernetes/config/worker-kubeconfig.yml
    owner: root:root
    permissions: "0644"
    content: |
      apiVersion: v1
      kind: Config
      clusters:
        - name: local
          cluster:
            server: https://{{ api_domain }}
            certificate-authority: /etc/kubernetes/ssl/worker-ca.pem
      users:
        - name: kubelet
          user:
            client-certificate: /etc/kubernetes/ssl/worker-crt.pem
            client-key: /etc/kubernetes/ssl/worker-key.pem
      contexts:
        - name: context
          context:
            cluster: local
            user: kubelet
      current-context: context
"#
);
